use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, codex_abort};
use crate::models::{ModelCatalog, Pong};
use crate::state::{AppState, RequestContext};
use crate::transform::{rewrite_chat_body, rewrite_code_body};
use crate::upstream::{UpstreamResponse, UpstreamTarget, error_kind};

const ROUTE_CHAT: &str = "chat_completions";
const ROUTE_CODE: &str = "code_completions";

pub async fn welcome() -> &'static str {
    "Welcome to the API"
}

pub async fn pong() -> impl IntoResponse {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() % 60)
        .unwrap_or(0);
    Json(Pong {
        now,
        status: "ok",
        ns1: "200 OK",
    })
}

pub async fn models() -> impl IntoResponse {
    Json(ModelCatalog::builtin())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Response {
    let start = Instant::now();
    state.metrics.record_request(ROUTE_CHAT);

    let raw = match read_body(body, &ctx.cancel).await {
        Ok(raw) => raw,
        Err(err) => return fail(&state, &ctx, ROUTE_CHAT, "read_body", err).into_response(),
    };

    let outbound = match rewrite_chat_body(&raw, &state.config) {
        Ok(outbound) => outbound,
        Err(err) => {
            let err = AppError::bad_request(err.to_string());
            return fail(&state, &ctx, ROUTE_CHAT, "transform", err).into_response();
        }
    };

    let target = UpstreamTarget::chat(&state.config);
    let resp = match state
        .upstream
        .post_json(&target, outbound, &ctx.cancel)
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            state.metrics.record_error(ROUTE_CHAT, error_kind(&err));
            let err = AppError::from_upstream(&err);
            log_failure(&ctx, ROUTE_CHAT, "upstream", &err);
            return err.into_response();
        }
    };

    if !resp.is_ok() {
        state.metrics.record_error(ROUTE_CHAT, "upstream_status");
        warn!(
            request_id = %ctx.request_id,
            route = ROUTE_CHAT,
            status = resp.status.as_u16(),
            "relaying upstream error"
        );
    }
    finish(&state, &ctx, ROUTE_CHAT, start, resp)
}

pub async fn code_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Response {
    let start = Instant::now();
    state.metrics.record_request(ROUTE_CODE);

    // Some completion backends misbehave on bursts of back-to-back calls.
    tokio::select! {
        _ = ctx.cancel.cancelled() => {}
        _ = tokio::time::sleep(state.config.codex_delay()) => {}
    }
    if ctx.cancel.is_cancelled() {
        let err = AppError {
            status: StatusCode::REQUEST_TIMEOUT,
            message: "request canceled before processing".to_string(),
        };
        return codex_fail(&state, &ctx, "delay", err);
    }

    let raw = match read_body(body, &ctx.cancel).await {
        Ok(raw) => raw,
        Err(err) => return codex_fail(&state, &ctx, "read_body", err),
    };

    let outbound = match rewrite_code_body(&raw, &state.config) {
        Ok(outbound) => outbound,
        Err(err) => {
            let err = AppError::bad_request(err.to_string());
            return codex_fail(&state, &ctx, "transform", err);
        }
    };

    let target = UpstreamTarget::codex(&state.config);
    let resp = match state
        .upstream
        .post_json(&target, outbound, &ctx.cancel)
        .await
    {
        Ok(resp) => resp,
        Err(err) => {
            state.metrics.record_error(ROUTE_CODE, error_kind(&err));
            let err = AppError::from_upstream(&err);
            log_failure(&ctx, ROUTE_CODE, "upstream", &err);
            return codex_abort(err.status);
        }
    };

    if !resp.is_ok() {
        state.metrics.record_error(ROUTE_CODE, "upstream_status");
        warn!(
            request_id = %ctx.request_id,
            route = ROUTE_CODE,
            status = resp.status.as_u16(),
            "code completion failed upstream"
        );
        return codex_abort(resp.status);
    }
    finish(&state, &ctx, ROUTE_CODE, start, resp)
}

async fn read_body(body: Body, cancel: &CancellationToken) -> Result<Bytes, AppError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError {
            status: StatusCode::REQUEST_TIMEOUT,
            message: "request canceled".to_string(),
        }),
        read = axum::body::to_bytes(body, usize::MAX) => {
            read.map_err(|e| AppError::bad_request(format!("failed to read request body: {}", e)))
        }
    }
}

fn finish(
    state: &AppState,
    ctx: &RequestContext,
    route: &'static str,
    start: Instant,
    resp: UpstreamResponse,
) -> Response {
    let latency_ms = start.elapsed().as_millis();
    state.metrics.record_latency(route, latency_ms as f64);
    info!(
        request_id = %ctx.request_id,
        route = route,
        status = resp.status.as_u16(),
        latency_ms = latency_ms,
        "request forwarded"
    );
    relay(resp)
}

/// Copies status, `Content-Type` and the body stream of `resp` into the reply.
fn relay(resp: UpstreamResponse) -> Response {
    let status = resp.status;
    let content_type = resp.content_type.clone();
    let mut response = Response::new(resp.into_body());
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

fn fail(
    state: &AppState,
    ctx: &RequestContext,
    route: &'static str,
    stage: &'static str,
    err: AppError,
) -> AppError {
    state.metrics.record_error(route, stage);
    log_failure(ctx, route, stage, &err);
    err
}

fn codex_fail(
    state: &AppState,
    ctx: &RequestContext,
    stage: &'static str,
    err: AppError,
) -> Response {
    let err = fail(state, ctx, ROUTE_CODE, stage, err);
    codex_abort(err.status)
}

fn log_failure(ctx: &RequestContext, route: &str, stage: &str, err: &AppError) {
    warn!(
        request_id = %ctx.request_id,
        route = route,
        stage = stage,
        status = err.status.as_u16(),
        "request failed: {}",
        err.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::init_metrics_noop;
    use axum::{Router, routing::post};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    fn test_state(base: &str, code_model: &str) -> AppState {
        let mut cfg = Config {
            chat_api_base: base.to_string(),
            chat_api_key: "chat-key".to_string(),
            codex_api_base: base.to_string(),
            codex_api_key: "code-key".to_string(),
            code_instruct_model: code_model.to_string(),
            chat_model_default: "gpt-4o-mini".to_string(),
            chat_model_map: HashMap::from([("gpt-4".to_string(), "deepseek-chat".to_string())]),
            codex_delay_ms: 10,
            ..Config::default()
        };
        cfg.normalize().expect("normalize");
        AppState::new(cfg, init_metrics_noop()).expect("state")
    }

    /// Upstream that echoes the forwarded JSON body and the bearer token it saw.
    fn echo_upstream() -> Router {
        let echo = |headers: axum::http::HeaderMap, body: Bytes| async move {
            let forwarded: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({ "auth": auth, "forwarded": forwarded }))
        };
        Router::new()
            .route("/chat/completions", post(echo))
            .route("/completions", post(echo))
    }

    fn slow_upstream() -> Router {
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "late"
        };
        Router::new()
            .route("/chat/completions", post(slow))
            .route("/completions", post(slow))
    }

    fn failing_upstream() -> Router {
        let failing = || async { (StatusCode::TOO_MANY_REQUESTS, "quota exceeded") };
        Router::new()
            .route("/chat/completions", post(failing))
            .route("/completions", post(failing))
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.expect("body").to_bytes()
    }

    fn cancel_after(ctx: &RequestContext, delay: Duration) {
        let token = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    #[tokio::test]
    async fn chat_forwards_rewritten_body() {
        let base = spawn_upstream(echo_upstream()).await;
        let state = test_state(&base, "gpt-3.5-turbo-instruct");
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "intent": true,
            "max_tokens": 100000
        });
        let resp = chat_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(body.to_string()),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
        let value: Value = serde_json::from_slice(&body_bytes(resp).await).expect("json");
        assert_eq!(value["auth"], "Bearer chat-key");
        let forwarded = &value["forwarded"];
        assert_eq!(forwarded["model"], "deepseek-chat");
        assert_eq!(forwarded["max_tokens"], 4096);
        assert!(forwarded.get("intent").is_none());
        assert_eq!(
            forwarded["messages"][0]["content"],
            "HiRespond in the following locale: zh_CN."
        );
    }

    #[tokio::test]
    async fn chat_relays_upstream_error_body() {
        let base = spawn_upstream(failing_upstream()).await;
        let state = test_state(&base, "gpt-3.5-turbo-instruct");
        let resp = chat_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(r#"{"messages":[]}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(&body_bytes(resp).await[..], b"quota exceeded");
    }

    #[tokio::test]
    async fn chat_rejects_invalid_json() {
        let state = test_state("http://127.0.0.1:1", "gpt-3.5-turbo-instruct");
        let resp = chat_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from("not json"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_transport_failure_is_500() {
        let state = test_state("http://127.0.0.1:1", "gpt-3.5-turbo-instruct");
        let resp = chat_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(r#"{"messages":[]}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn chat_cancellation_yields_408() {
        let base = spawn_upstream(slow_upstream()).await;
        let state = test_state(&base, "gpt-3.5-turbo-instruct");
        let ctx = RequestContext::new();
        cancel_after(&ctx, Duration::from_millis(100));
        let resp = tokio::time::timeout(
            Duration::from_secs(5),
            chat_completions(State(state), Extension(ctx), Body::from(r#"{"messages":[]}"#)),
        )
        .await
        .expect("must not hang");
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn code_forwards_fim_body_with_code_credentials() {
        let base = spawn_upstream(echo_upstream()).await;
        let state = test_state(&base, "stable-code-3b");
        let resp = code_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(r#"{"prompt":"def f(","suffix":")","extra":{},"nwo":"a/b"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let value: Value = serde_json::from_slice(&body_bytes(resp).await).expect("json");
        assert_eq!(value["auth"], "Bearer code-key");
        let forwarded = &value["forwarded"];
        assert_eq!(forwarded["model"], "stable-code-3b");
        assert!(forwarded.get("extra").is_none());
        assert_eq!(
            forwarded["messages"][0]["content"],
            "<fim_prefix>def f(<fim_suffix>)<fim_middle>"
        );
    }

    #[tokio::test]
    async fn code_upstream_error_becomes_stream_done() {
        let base = spawn_upstream(failing_upstream()).await;
        let state = test_state(&base, "gpt-3.5-turbo-instruct");
        let resp = code_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(r#"{"prompt":"x"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"text/event-stream"[..])
        );
        assert_eq!(&body_bytes(resp).await[..], b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn code_transport_failure_is_synthetic_500() {
        let state = test_state("http://127.0.0.1:1", "gpt-3.5-turbo-instruct");
        let resp = code_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from(r#"{"prompt":"x"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body_bytes(resp).await[..], b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn code_invalid_json_is_synthetic_400() {
        let state = test_state("http://127.0.0.1:1", "gpt-3.5-turbo-instruct");
        let resp = code_completions(
            State(state),
            Extension(RequestContext::new()),
            Body::from("{"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(&body_bytes(resp).await[..], b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn code_cancellation_yields_408() {
        let base = spawn_upstream(slow_upstream()).await;
        let state = test_state(&base, "gpt-3.5-turbo-instruct");
        let ctx = RequestContext::new();
        cancel_after(&ctx, Duration::from_millis(100));
        let resp = tokio::time::timeout(
            Duration::from_secs(5),
            code_completions(State(state), Extension(ctx), Body::from(r#"{"prompt":"x"}"#)),
        )
        .await
        .expect("must not hang");
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(&body_bytes(resp).await[..], b"data: [DONE]\n");
    }

    #[tokio::test]
    async fn code_canceled_during_delay_skips_upstream() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let base = spawn_upstream(Router::new().route(
            "/completions",
            post(move || {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        ))
        .await;
        let mut state = test_state(&base, "gpt-3.5-turbo-instruct");
        let mut cfg = (*state.config).clone();
        cfg.codex_delay_ms = 5_000;
        state.config = Arc::new(cfg);

        let ctx = RequestContext::new();
        cancel_after(&ctx, Duration::from_millis(20));
        let resp = tokio::time::timeout(
            Duration::from_secs(2),
            code_completions(State(state), Extension(ctx), Body::from(r#"{"prompt":"x"}"#)),
        )
        .await
        .expect("delay must be cancellable");
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pong_reports_ok() {
        let resp = pong().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let value: Value = serde_json::from_slice(&body_bytes(resp).await).expect("json");
        assert_eq!(value["status"], "ok");
        assert_eq!(value["ns1"], "200 OK");
        assert!(value["now"].as_u64().is_some_and(|now| now < 60));
    }
}
