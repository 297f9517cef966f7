//! # Audit Chain API

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::state::AppState;

/// Result of walking the applicability audit chain.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainVerificationResponse {
    pub total_events: usize,
    pub broken_links: usize,
    pub tampered_events: usize,
    pub chain_valid: bool,
}

/// Build the audit router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/audit/verify", get(verify_chain))
}

/// GET /v1/audit/verify — Verify hash continuity of the audit chain.
#[utoipa::path(
    get,
    path = "/v1/audit/verify",
    responses(
        (status = 200, description = "Verification result", body = ChainVerificationResponse),
        (status = 503, description = "Store unavailable", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
async fn verify_chain(
    State(state): State<AppState>,
) -> Result<Json<ChainVerificationResponse>, AppError> {
    let v = state.engine.verify_audit_chain().await?;
    Ok(Json(ChainVerificationResponse {
        total_events: v.total_events,
        broken_links: v.broken_links,
        tampered_events: v.tampered_events,
        chain_valid: v.chain_valid,
    }))
}
