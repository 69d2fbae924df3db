use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::require_token;
use crate::handlers::{chat_completions, code_completions, models, pong, welcome};
use crate::state::{AppState, attach_request_context};

/// Builds the route table. With an auth token configured every route moves under a
/// leading `/{token}` segment and passes through the gate first.
pub fn build_router(state: AppState) -> Router {
    let router = if state.gate.is_enabled() {
        gated_routes().route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_token,
        ))
    } else {
        open_routes()
    };
    router
        .layer(middleware::from_fn(attach_request_context))
        .with_state(state)
}

fn open_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/_ping", get(pong))
        .route("/models", get(models))
        .route("/v1/models", get(models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/engines/copilot-codex/completions", post(code_completions))
        .route("/v1/v1/chat/completions", post(chat_completions))
        .route(
            "/v1/v1/engines/copilot-codex/completions",
            post(code_completions),
        )
}

fn gated_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/{token}/v1/_ping", get(pong))
        .route("/{token}/v1/models", get(models))
        .route("/{token}/v1/v1/models", get(models))
        .route("/{token}/v1/chat/completions", post(chat_completions))
        .route(
            "/{token}/v1/engines/copilot-codex/completions",
            post(code_completions),
        )
        .route("/{token}/v1/v1/chat/completions", post(chat_completions))
        .route(
            "/{token}/v1/v1/engines/copilot-codex/completions",
            post(code_completions),
        )
}
