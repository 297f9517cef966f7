//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers to extract and
//! validate JSON bodies in handlers, and the acting-user header lookup.

use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::Json;
use reqmap_core::{Actor, ValidationError};

use crate::error::AppError;

/// Header carrying the identity of the caller performing a write.
pub const ACTOR_HEADER: &str = "x-actor";

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
///
/// Runs before any store access, so a rejected body never costs a lookup.
pub trait Validate {
    /// Validate business rules, naming the offending input on failure.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Extract a JSON body.
///
/// Syntactically broken JSON is a [`AppError::BadRequest`]. A well-formed
/// body whose content does not fit the request type (unknown enum value,
/// out-of-range ordinal, wrong field type) is a [`AppError::Validation`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result.map(|Json(v)| v).map_err(|err| match err {
        JsonRejection::JsonDataError(_) => AppError::Validation(err.body_text()),
        other => AppError::BadRequest(other.body_text()),
    })
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate()?;
    Ok(value)
}

/// Read the acting user from the `X-Actor` header.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let raw = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| AppError::Validation("missing X-Actor header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Validation("X-Actor header is not valid text".to_string()))?;
    Ok(Actor::new(raw)?)
}
