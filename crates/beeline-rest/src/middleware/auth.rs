//! Static bearer token authentication middleware.
//!
//! When the server configuration carries an API token, every route
//! behind this middleware requires `Authorization: Bearer <token>`.
//! Without a configured token the middleware passes everything through,
//! which is the default for local development.

use crate::responses::AppError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use beeline_core::QueueError;
use std::sync::Arc;
use tracing::warn;

/// State for the bearer auth middleware.
#[derive(Clone)]
pub struct AuthState {
    token: Option<Arc<str>>,
}

impl AuthState {
    /// Creates auth state; `None` disables the check.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Into::into),
        }
    }

}

/// Rejects requests that do not present the configured bearer token.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = auth.token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected request with invalid API token");
            AppError(QueueError::unauthorized("invalid API token")).into_response()
        }
        None => {
            AppError(QueueError::unauthorized("missing bearer token")).into_response()
        }
    }
}
