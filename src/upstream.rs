//! Single-shot forwarding of a rewritten body to one of the two upstream targets.

use axum::body::{Body, Bytes};
use futures_util::TryStreamExt;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry_semantic_conventions::attribute::{HTTP_RESPONSE_STATUS_CODE, URL_FULL};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request canceled")]
    Canceled,
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Credentials and endpoint of one upstream target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub url: String,
    pub api_key: String,
    pub organization: String,
    pub project: String,
}

impl UpstreamTarget {
    pub fn chat(config: &Config) -> Self {
        Self {
            url: config.chat_completions_url(),
            api_key: config.chat_api_key.clone(),
            organization: config.chat_api_organization.clone(),
            project: config.chat_api_project.clone(),
        }
    }

    pub fn codex(config: &Config) -> Self {
        Self {
            url: config.codex_completions_url(),
            api_key: config.codex_api_key.clone(),
            organization: config.codex_api_organization.clone(),
            project: config.codex_api_project.clone(),
        }
    }
}

pub enum UpstreamBody {
    Streaming(reqwest::Response),
    /// Non-200 bodies are read once for logging and replayed from memory.
    Buffered(Bytes),
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn into_body(self) -> Body {
        match self.body {
            UpstreamBody::Streaming(resp) => {
                Body::from_stream(resp.bytes_stream().map_err(std::io::Error::other))
            }
            UpstreamBody::Buffered(bytes) => Body::from(bytes),
        }
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = config.proxy_url() {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// POSTs `body` to `target`. Resolves to `Canceled` as soon as `cancel` fires, dropping
    /// the in-flight request.
    pub async fn post_json(
        &self,
        target: &UpstreamTarget,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut span = global::tracer("copilot-gateway").start("copilot.gateway.upstream");
        span.set_attribute(KeyValue::new(URL_FULL, target.url.clone()));

        let mut request = self
            .client
            .post(&target.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", target.api_key));
        if !target.organization.is_empty() {
            request = request.header("OpenAI-Organization", target.organization.as_str());
        }
        if !target.project.is_empty() {
            request = request.header("OpenAI-Project", target.project.as_str());
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(UpstreamError::Canceled),
            sent = request.body(body).send() => sent.map_err(UpstreamError::from),
        };
        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                span.set_attribute(KeyValue::new("error.type", error_kind(&err)));
                span.end();
                return Err(err);
            }
        };

        let status = resp.status();
        span.set_attribute(KeyValue::new(
            HTTP_RESPONSE_STATUS_CODE,
            i64::from(status.as_u16()),
        ));
        span.end();

        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        if status == StatusCode::OK {
            return Ok(UpstreamResponse {
                status,
                content_type,
                body: UpstreamBody::Streaming(resp),
            });
        }

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(UpstreamError::Canceled),
            read = resp.bytes() => read.unwrap_or_default(),
        };
        warn!(
            url = %target.url,
            status = status.as_u16(),
            "upstream returned error: {}",
            String::from_utf8_lossy(&bytes)
        );
        Ok(UpstreamResponse {
            status,
            content_type,
            body: UpstreamBody::Buffered(bytes),
        })
    }
}

pub fn error_kind(err: &UpstreamError) -> &'static str {
    match err {
        UpstreamError::Canceled => "canceled",
        UpstreamError::Transport(_) => "transport",
    }
}
