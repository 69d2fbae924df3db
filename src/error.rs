use axum::{
    Json,
    body::Body,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::upstream::UpstreamError;

/// Body that tells a token-stream client the completion is over.
pub const STREAM_DONE: &str = "data: [DONE]\n";

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn from_upstream(err: &UpstreamError) -> Self {
        Self {
            status: upstream_status(err),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn upstream_status(err: &UpstreamError) -> StatusCode {
    match err {
        UpstreamError::Canceled => StatusCode::REQUEST_TIMEOUT,
        UpstreamError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Ends a code completion stream early with `status`.
pub fn codex_abort(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/event-stream")
        .body(Body::from(STREAM_DONE))
        .unwrap_or_else(|_| status.into_response())
}
