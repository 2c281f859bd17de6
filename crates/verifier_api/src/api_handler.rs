//! Shared API types and error mapping
//!
//! The probe itself never fails - the engine always returns a verdict.
//! Errors here cover bad requests and storage/serialization problems.

use axum::{http::StatusCode, response::IntoResponse, response::Json};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use verifier_core::{Category, Verdict};

/// API error, rendered as `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error processing email.".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Plain informational response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Verdict standing in for an address that failed inside a batch
pub fn error_verdict(email: &str, message: &str) -> Verdict {
    let mut verdict = Verdict::new(email);
    verdict.category = Category::Error;
    verdict.errors = Some(message.to_string());
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_verdict_shape() {
        let verdict = error_verdict("x@example.com", "boom");
        assert_eq!(verdict.category, Category::Error);
        assert_eq!(verdict.errors.as_deref(), Some("boom"));
        assert_eq!(verdict.email, "x@example.com");

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["category"], "Error");
    }
}
