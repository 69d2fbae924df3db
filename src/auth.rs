use axum::{
    extract::{Path, Request, State, rejection::PathRejection},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;

/// Path-token check guarding every route once an `auth_token` is configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthGate {
    Disabled,
    Enabled(Arc<str>),
}

impl AuthGate {
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => AuthGate::Enabled(Arc::from(token)),
            _ => AuthGate::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, AuthGate::Enabled(_))
    }

    pub fn check(&self, presented: &str) -> Result<(), AppError> {
        match self {
            AuthGate::Disabled => Ok(()),
            AuthGate::Enabled(_) if presented.is_empty() => {
                warn!("auth token is empty");
                Err(AppError::unauthorized())
            }
            AuthGate::Enabled(expected) if presented != &**expected => {
                warn!("auth token mismatch");
                Err(AppError::unauthorized())
            }
            AuthGate::Enabled(_) => Ok(()),
        }
    }
}

const TOKEN_PARAM: &str = "token";

/// The percent-decoded `{token}` segment of the matched route, or `""` for routes
/// without one.
fn presented_token(params: &Result<Path<HashMap<String, String>>, PathRejection>) -> &str {
    match params {
        Ok(Path(params)) => params.get(TOKEN_PARAM).map(String::as_str).unwrap_or_default(),
        Err(_) => "",
    }
}

pub async fn require_token(
    State(gate): State<AuthGate>,
    params: Result<Path<HashMap<String, String>>, PathRejection>,
    req: Request,
    next: Next,
) -> Response {
    match gate.check(presented_token(&params)) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}
