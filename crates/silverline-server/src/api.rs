//! Shared error type for the JSON API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use silverline_assist::LimitError;
use thiserror::Error;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    TooLong(LimitError),
    #[error("conflict: {message}")]
    Conflict { message: String, status: String },
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            ApiError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": "validation failed", "details": fields }),
            ),
            ApiError::TooLong(err) => {
                let mut body = serde_json::json!({ "error": err.to_string() });
                if let LimitError::TooLong { kind, length, max } = err {
                    body["type"] = kind.as_str().into();
                    body["length"] = length.into();
                    body["maximum"] = max.into();
                }
                (StatusCode::BAD_REQUEST, body)
            }
            ApiError::Conflict { message, status } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": message, "existingStatus": status }),
            ),
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
