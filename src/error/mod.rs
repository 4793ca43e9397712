use std::any::Any;
use std::collections::HashMap;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::queue::QueueError;
use crate::store::StoreError;

/// Client-facing message for unexpected failures; the detail is logged
/// server-side only.
const INTERNAL_ERROR_MESSAGE: &str =
    "The server encountered a problem and could not process your request";

const NOT_FOUND_MESSAGE: &str = "The requested resource could not be found";

#[derive(Debug, Error)]
pub enum AppError {
    /// Field-level validation failures, rendered as a field → reason map.
    #[error("validation failed")]
    Validation(HashMap<String, String>),

    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("the requested resource could not be found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": errors }))).into_response()
            }
            AppError::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, &message)
            }
            AppError::NotFound | AppError::Store(StoreError::RecordNotFound) => {
                error_response(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
            }
            AppError::Store(err) => {
                tracing::error!(error = %err, "store operation failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
            AppError::Queue(err) => {
                tracing::error!(error = %err, "queue operation failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
}

/// Fallback for known routes hit with an unsupported method.
pub async fn method_not_allowed(method: Method) -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &format!("The method {} is not supported for this resource", method),
    )
}

/// Convert a handler panic into a 500 and close the connection.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    tracing::error!(panic = %detail, "handler panicked");

    let mut response = error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE);
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let mut errors = HashMap::new();
        errors.insert("content".to_string(), "Content is required".to_string());

        let response = AppError::Validation(errors).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_record_not_found_maps_to_404() {
        let response = AppError::from(StoreError::RecordNotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_maps_to_500() {
        let response = AppError::internal("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_panic_response_closes_connection() {
        let response = handle_panic(Box::new("worker blew up"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONNECTION),
            Some(&HeaderValue::from_static("close"))
        );
    }
}
