//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps engine errors to HTTP status codes and JSON error bodies with an
//! error code and message. Domain validation failures also carry the
//! rejected input's fields under `details`. Internal and persistence
//! failure messages are logged, never returned to clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqmap_core::{EngineError, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the caller may retry the same request unchanged.
    pub retryable: bool,
    /// Structured fields of a rejected input: `kind` plus the offending
    /// `field`, `op` or `value` where they apply. Only set on 422 responses
    /// caused by a [`ValidationError`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request content failed validation (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// A domain validation rule rejected the input (422, with details).
    #[error("validation error: {0}")]
    InvalidInput(ValidationError),

    /// Request body is not well-formed JSON (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Concurrent write violated a uniqueness invariant (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store unavailable or failed mid-operation (503). Message is logged
    /// but not returned to the client.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) | Self::InvalidInput(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::PersistenceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PERSISTENCE_UNAVAILABLE")
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::PersistenceUnavailable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::PersistenceUnavailable(_) => {
                "The store is temporarily unavailable; retry the request".to_string()
            }
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::PersistenceUnavailable(_) => tracing::error!(error = %self, "persistence failure"),
            Self::Conflict(_) => tracing::warn!(error = %self, "write conflict"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                retryable: self.retryable(),
                details: match &self {
                    Self::InvalidInput(err) => Some(validation_details(err)),
                    _ => None,
                },
            },
        };

        (status, Json(body)).into_response()
    }
}

fn validation_details(err: &ValidationError) -> serde_json::Value {
    use serde_json::json;
    match err {
        ValidationError::UnknownField(field) => json!({"kind": "unknown_field", "field": field}),
        ValidationError::UnknownOperator { field, op } => {
            json!({"kind": "unknown_operator", "field": field, "op": op})
        }
        ValidationError::InvalidRank {
            field,
            value,
            expected,
        } => json!({
            "kind": "invalid_rank",
            "field": field,
            "value": value,
            "expected": expected,
        }),
        ValidationError::MissingValue { field, op } => {
            json!({"kind": "missing_value", "field": field, "op": op})
        }
        ValidationError::InvalidValue { field, op, reason } => {
            json!({"kind": "invalid_value", "field": field, "op": op, "reason": reason})
        }
        ValidationError::InvertedBounds { min, max } => {
            json!({"kind": "inverted_bounds", "min": min, "max": max})
        }
        ValidationError::EmptyAnyOf => json!({"kind": "empty_any_of"}),
        ValidationError::MalformedFilter(reason) => {
            json!({"kind": "malformed_filter", "reason": reason})
        }
        ValidationError::MissingReason => json!({"kind": "missing_reason", "field": "reason"}),
        ValidationError::ReasonTooLong { max, actual } => {
            json!({"kind": "too_long", "field": "reason", "max": max, "actual": actual})
        }
        ValidationError::EmptyActor => json!({"kind": "empty_actor", "field": "actor"}),
        ValidationError::ActorTooLong { max, actual } => {
            json!({"kind": "too_long", "field": "actor", "max": max, "actual": actual})
        }
        ValidationError::EmptyRequirementFilter => {
            json!({"kind": "empty_requirement_filter", "field": "filter"})
        }
        ValidationError::InvalidAttributes(reason) => {
            json!({"kind": "invalid_attributes", "field": "attributes", "reason": reason})
        }
        ValidationError::InvalidMapping(reason) => {
            json!({"kind": "invalid_mapping", "reason": reason})
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err)
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => Self::InvalidInput(e),
            EngineError::NotFound(e) => Self::NotFound(e.to_string()),
            EngineError::Conflict(msg) => Self::Conflict(msg),
            EngineError::Persistence(e) => Self::PersistenceUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use reqmap_core::{PersistenceError, ResourceKind};

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                AppError::Validation("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                AppError::PersistenceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "PERSISTENCE_UNAVAILABLE",
            ),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }

    #[test]
    fn engine_errors_map_to_api_errors() {
        let not_found = AppError::from(EngineError::not_found(ResourceKind::Rule, "r-1"));
        assert!(matches!(not_found, AppError::NotFound(ref m) if m.contains("r-1")));

        let missing = AppError::from(EngineError::Validation(ValidationError::MissingReason));
        assert!(matches!(
            missing,
            AppError::InvalidInput(ValidationError::MissingReason)
        ));

        let down = AppError::from(EngineError::Persistence(PersistenceError::new(
            "list_rules",
            "pool timed out",
        )));
        assert!(matches!(down, AppError::PersistenceUnavailable(_)));
    }

    #[tokio::test]
    async fn persistence_failure_hides_driver_message() {
        let (status, body) =
            response_parts(AppError::PersistenceUnavailable("password authentication failed".into()))
                .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.error.retryable);
        assert!(!body.error.message.contains("password"));
    }

    #[tokio::test]
    async fn internal_error_hides_details() {
        let (status, body) = response_parts(AppError::Internal("db connection failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.message, "An internal error occurred");
        assert!(!body.error.retryable);
    }

    #[tokio::test]
    async fn validation_message_is_actionable() {
        let err = AppError::from(ValidationError::MissingReason);
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.error.message.contains("reason"), "{}", body.error.message);
        let details = body.error.details.unwrap();
        assert_eq!(details["kind"], "missing_reason");
        assert_eq!(details["field"], "reason");
    }

    #[tokio::test]
    async fn filter_errors_carry_structured_details() {
        let err = AppError::from(EngineError::Validation(ValidationError::InvalidRank {
            field: "kii_category".to_string(),
            value: "7".to_string(),
            expected: "1, 2, 3",
        }));
        let (status, body) = response_parts(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error.code, "VALIDATION_ERROR");
        let details = body.error.details.unwrap();
        assert_eq!(details["kind"], "invalid_rank");
        assert_eq!(details["field"], "kii_category");
        assert_eq!(details["value"], "7");
    }

    #[tokio::test]
    async fn header_validation_has_no_details() {
        let (status, body) = response_parts(AppError::Validation("missing X-Actor header".into())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.error.details.is_none());
    }

    #[test]
    fn error_body_skips_empty_details() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "TEST".to_string(),
                message: "test message".to_string(),
                retryable: false,
                details: None,
            },
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("TEST"));
        assert!(!json.contains("details"));
    }
}
