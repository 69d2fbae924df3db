use crate::auth::AuthGate;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::upstream::UpstreamClient;
use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: UpstreamClient,
    pub metrics: Metrics,
    pub gate: AuthGate,
}

impl AppState {
    pub fn new(config: Config, metrics: Metrics) -> Result<Self, reqwest::Error> {
        let upstream = UpstreamClient::new(&config)?;
        let gate = AuthGate::from_token(config.auth_token());
        Ok(Self {
            config: Arc::new(config),
            upstream,
            metrics,
            gate,
        })
    }
}

/// Per-request identity and cancellation, attached by [`attach_request_context`].
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: next_request_id(),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels the request's token if the handler future is dropped before it finishes,
/// which is what happens when the client goes away.
pub async fn attach_request_context(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::new();
    let guard = ctx.cancel.clone().drop_guard();
    req.extensions_mut().insert(ctx);
    let resp = next.run(req).await;
    guard.disarm();
    resp
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("req-{}-{}", ts, seq)
}
