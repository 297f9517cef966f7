//! # Requirement Rule API
//!
//! Rule administration for one requirement (read, replace, delete), a
//! side-effect-free preview of a filter against current organizations,
//! per-requirement mapping listing and explicit reconciliation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqmap_core::{RequirementId, RuleKind, ValidationError};
use reqmap_engine::{ApplicabilityRule, RuleChange, RuleDraft};
use reqmap_filter::FilterExpr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{MappingListResponse, ReconcileResponse};
use crate::error::AppError;
use crate::extractors::{actor_from_headers, extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Create or replace the rule of a requirement.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertRuleRequest {
    /// `automatic` or `manual`.
    #[schema(value_type = String)]
    pub kind: RuleKind,
    /// Filter tree for automatic rules; ignored for manual rules. Absent or
    /// empty matches every organization.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub filter: Option<serde_json::Value>,
}

impl Validate for UpsertRuleRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.kind {
            RuleKind::Automatic => FilterExpr::parse_optional(self.filter.as_ref()).map(drop),
            RuleKind::Manual => Ok(()),
        }
    }
}

/// A stored rule.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RuleResponse {
    pub requirement_id: Uuid,
    pub kind: String,
    #[schema(value_type = Object)]
    pub filter: Option<serde_json::Value>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on saves and deletes: false when the cache still needs a reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_refreshed: Option<bool>,
}

impl From<RuleChange> for RuleResponse {
    fn from(change: RuleChange) -> Self {
        Self {
            cache_refreshed: Some(change.cache_refreshed),
            ..change.rule.into()
        }
    }
}

impl From<ApplicabilityRule> for RuleResponse {
    fn from(rule: ApplicabilityRule) -> Self {
        Self {
            requirement_id: *rule.requirement_id.as_uuid(),
            kind: rule.kind.as_str().to_string(),
            filter: rule.filter.as_ref().map(FilterExpr::to_json),
            created_by: rule.created_by.to_string(),
            updated_by: rule.updated_by.to_string(),
            created_at: rule.created_at,
            updated_at: rule.updated_at,
            cache_refreshed: None,
        }
    }
}

/// Filter to evaluate without saving.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PreviewRequest {
    #[schema(value_type = Object)]
    pub filter: serde_json::Value,
}

/// Organizations a filter would match.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PreviewResponse {
    pub evaluated: usize,
    /// Matching organization ids in ascending order.
    pub matched: Vec<Uuid>,
    pub matched_count: usize,
}

/// Build the requirements router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/requirements/:req_id/rule",
            get(get_rule).put(upsert_rule).delete(delete_rule),
        )
        .route("/v1/requirements/:req_id/mappings", get(list_mappings))
        .route("/v1/requirements/:req_id/reconcile", post(reconcile))
        .route("/v1/rules/preview", post(preview_rule))
}

/// GET /v1/requirements/:req_id/rule — Read the rule.
#[utoipa::path(
    get,
    path = "/v1/requirements/{req_id}/rule",
    params(("req_id" = Uuid, Path, description = "Requirement ID")),
    responses(
        (status = 200, description = "Stored rule", body = RuleResponse),
        (status = 404, description = "Requirement or rule not found", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn get_rule(
    State(state): State<AppState>,
    Path(req_id): Path<Uuid>,
) -> Result<Json<RuleResponse>, AppError> {
    let rule = state
        .engine
        .get_rule(RequirementId::from_uuid(req_id))
        .await?;
    Ok(Json(rule.into()))
}

/// PUT /v1/requirements/:req_id/rule — Create or replace the rule.
#[utoipa::path(
    put,
    path = "/v1/requirements/{req_id}/rule",
    params(("req_id" = Uuid, Path, description = "Requirement ID")),
    request_body = UpsertRuleRequest,
    responses(
        (status = 200, description = "Rule saved and cache refreshed", body = RuleResponse),
        (status = 404, description = "Requirement not found", body = crate::error::ErrorBody),
        (status = 422, description = "Malformed filter", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn upsert_rule(
    State(state): State<AppState>,
    Path(req_id): Path<Uuid>,
    headers: HeaderMap,
    body: Result<Json<UpsertRuleRequest>, JsonRejection>,
) -> Result<Json<RuleResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = extract_validated_json(body)?;
    let draft = RuleDraft {
        kind: req.kind,
        filter: req.filter,
    };
    let change = state
        .engine
        .upsert_rule(RequirementId::from_uuid(req_id), &draft, actor)
        .await?;
    Ok(Json(change.into()))
}

/// DELETE /v1/requirements/:req_id/rule — Delete the rule and its cache rows.
#[utoipa::path(
    delete,
    path = "/v1/requirements/{req_id}/rule",
    params(("req_id" = Uuid, Path, description = "Requirement ID")),
    responses(
        (status = 200, description = "Deleted rule", body = RuleResponse),
        (status = 404, description = "No rule for this requirement", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn delete_rule(
    State(state): State<AppState>,
    Path(req_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<RuleResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let removed = state
        .engine
        .delete_rule(RequirementId::from_uuid(req_id), actor)
        .await?;
    Ok(Json(removed.into()))
}

/// GET /v1/requirements/:req_id/mappings — Stored rows for a requirement.
#[utoipa::path(
    get,
    path = "/v1/requirements/{req_id}/mappings",
    params(("req_id" = Uuid, Path, description = "Requirement ID")),
    responses(
        (status = 200, description = "Rows ordered by organization id", body = MappingListResponse),
        (status = 404, description = "Requirement not found", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn list_mappings(
    State(state): State<AppState>,
    Path(req_id): Path<Uuid>,
) -> Result<Json<MappingListResponse>, AppError> {
    let rows = state
        .engine
        .mappings_for_requirement(RequirementId::from_uuid(req_id))
        .await?;
    Ok(Json(rows.into()))
}

/// POST /v1/requirements/:req_id/reconcile — Refresh this requirement's cache rows.
#[utoipa::path(
    post,
    path = "/v1/requirements/{req_id}/reconcile",
    params(("req_id" = Uuid, Path, description = "Requirement ID")),
    responses(
        (status = 200, description = "Cache reconciled", body = ReconcileResponse),
        (status = 404, description = "Requirement not found", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn reconcile(
    State(state): State<AppState>,
    Path(req_id): Path<Uuid>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let report = state
        .engine
        .reconcile_requirement(RequirementId::from_uuid(req_id))
        .await?;
    state.metrics.reconciled(report.written, report.removed);
    Ok(Json(report.into()))
}

/// POST /v1/rules/preview — Organizations a filter would match.
#[utoipa::path(
    post,
    path = "/v1/rules/preview",
    request_body = PreviewRequest,
    responses(
        (status = 200, description = "Preview computed; nothing saved", body = PreviewResponse),
        (status = 422, description = "Malformed filter", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
async fn preview_rule(
    State(state): State<AppState>,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> Result<Json<PreviewResponse>, AppError> {
    let req = extract_json(body)?;
    let preview = state.engine.preview_rule(&req.filter).await?;
    Ok(Json(PreviewResponse {
        evaluated: preview.evaluated,
        matched_count: preview.matched.len(),
        matched: preview.matched.iter().map(|id| *id.as_uuid()).collect(),
    }))
}
