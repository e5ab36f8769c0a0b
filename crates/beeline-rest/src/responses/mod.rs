//! API response types and error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beeline_core::{ErrorResponse, QueueError};

/// Application error type for Axum.
#[derive(Debug)]
pub struct AppError(pub QueueError);

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = Json(ErrorResponse::from_error(&self.0));
        (status, body).into_response()
    }
}

/// Result type for Axum handlers.
pub type ApiResult<T> = Result<Json<T>, AppError>;

/// Helper to create a success response.
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(data))
}

/// Helper to create a created (201) response.
pub fn created<T>(data: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_status() {
        let response = AppError(QueueError::not_found("j-1")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError(QueueError::conflict("taken")).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError(QueueError::validation("bad")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
