//! # Organization API
//!
//! Resolution of an organization's applicable requirements, attribute
//! maintenance, manual decisions, bulk inclusion, mapping listing, decision
//! history and explicit cache reconciliation.
//!
//! Every mutation requires the `X-Actor` header.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqmap_core::{
    OrganizationAttributes, OrganizationId, Reason, RequirementId, ValidationError,
};
use reqmap_engine::{AuditEvent, BulkOutcome, Resolution, ResolutionCounts, ResolvedRequirement};
use reqmap_filter::RequirementFilter;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{MappingListResponse, MappingView, ReconcileResponse};
use crate::error::AppError;
use crate::extractors::{actor_from_headers, extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Effective requirement list for one organization.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolutionResponse {
    pub organization_id: Uuid,
    /// Applicable requirements ordered by requirement id.
    #[schema(value_type = Vec<Object>)]
    pub requirements: Vec<ResolvedRequirement>,
    /// Manually excluded requirements, for explanation.
    #[schema(value_type = Vec<Object>)]
    pub excluded: Vec<ResolvedRequirement>,
    #[schema(value_type = Object)]
    pub counts: ResolutionCounts,
}

impl From<Resolution> for ResolutionResponse {
    fn from(r: Resolution) -> Self {
        Self {
            organization_id: *r.organization_id.as_uuid(),
            requirements: r.requirements,
            excluded: r.excluded,
            counts: r.counts,
        }
    }
}

/// Current attributes of an organization.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttributesResponse {
    pub organization_id: Uuid,
    #[schema(value_type = Object)]
    pub attributes: OrganizationAttributes,
    /// Absent when the attributes were never set.
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set on updates: false when the automatic cache still needs a reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_refreshed: Option<bool>,
}

/// Replace an organization's attributes.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAttributesRequest {
    #[schema(value_type = Object)]
    pub attributes: OrganizationAttributes,
}

/// Include or exclude one requirement.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ManualDecisionRequest {
    /// Justification recorded with the decision. Required.
    pub reason: Option<String>,
}

impl Validate for ManualDecisionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Reason::required(self.reason.as_deref()).map(drop)
    }
}

/// Result of removing a manual decision.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevertResponse {
    /// False when there was no manual decision to remove.
    pub removed: bool,
    pub mapping: Option<MappingView>,
    /// False when the pair's cache row still needs a reconcile.
    pub cache_refreshed: bool,
}

/// Include every catalog requirement matching a filter.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkIncludeRequest {
    /// Requirement criteria (`framework`, `criticality`, `category`); at least one.
    #[schema(value_type = Object)]
    pub filter: RequirementFilter,
    /// Justification shared by every mapping of the call. Required.
    pub reason: Option<String>,
}

impl Validate for BulkIncludeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        self.filter.validate()?;
        Reason::required(self.reason.as_deref()).map(drop)
    }
}

/// Result of a bulk inclusion.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BulkIncludeResponse {
    pub batch_id: Uuid,
    pub matched: usize,
    pub created: usize,
    pub updated: usize,
    pub committed: usize,
    pub decided_at: DateTime<Utc>,
}

impl From<BulkOutcome> for BulkIncludeResponse {
    fn from(o: BulkOutcome) -> Self {
        Self {
            batch_id: *o.batch_id.as_uuid(),
            matched: o.matched,
            created: o.created,
            updated: o.updated,
            committed: o.committed(),
            decided_at: o.decided_at,
        }
    }
}

/// Audit events for one (organization, requirement) pair, oldest first.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<AuditEvent>,
    pub count: usize,
}

/// Build the organizations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/organizations/:org_id/requirements", get(resolve))
        .route(
            "/v1/organizations/:org_id/attributes",
            get(get_attributes).put(update_attributes),
        )
        .route("/v1/organizations/:org_id/mappings", get(list_mappings))
        .route(
            "/v1/organizations/:org_id/requirements/:req_id/include",
            post(include),
        )
        .route(
            "/v1/organizations/:org_id/requirements/:req_id/exclude",
            post(exclude),
        )
        .route(
            "/v1/organizations/:org_id/requirements/:req_id/mapping",
            delete(revert),
        )
        .route(
            "/v1/organizations/:org_id/requirements/:req_id/history",
            get(history),
        )
        .route("/v1/organizations/:org_id/bulk-include", post(bulk_include))
        .route("/v1/organizations/:org_id/reconcile", post(reconcile))
}

/// GET /v1/organizations/:org_id/requirements — Resolve applicable requirements.
#[utoipa::path(
    get,
    path = "/v1/organizations/{org_id}/requirements",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Effective requirement list", body = ResolutionResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
        (status = 503, description = "Store unavailable", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn resolve(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<ResolutionResponse>, AppError> {
    let resolution = state
        .engine
        .resolve_for_organization(OrganizationId::from_uuid(org_id))
        .await?;
    state.metrics.resolution_served();
    Ok(Json(resolution.into()))
}

/// GET /v1/organizations/:org_id/attributes — Current attributes.
#[utoipa::path(
    get,
    path = "/v1/organizations/{org_id}/attributes",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Current attributes", body = AttributesResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn get_attributes(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<AttributesResponse>, AppError> {
    let record = state
        .engine
        .get_attributes(OrganizationId::from_uuid(org_id))
        .await?;
    let response = match record {
        Some(r) => AttributesResponse {
            organization_id: org_id,
            attributes: r.attributes,
            updated_by: Some(r.updated_by.to_string()),
            updated_at: Some(r.updated_at),
            cache_refreshed: None,
        },
        None => AttributesResponse {
            organization_id: org_id,
            attributes: OrganizationAttributes::default(),
            updated_by: None,
            updated_at: None,
            cache_refreshed: None,
        },
    };
    Ok(Json(response))
}

/// PUT /v1/organizations/:org_id/attributes — Replace attributes and refresh the cache.
#[utoipa::path(
    put,
    path = "/v1/organizations/{org_id}/attributes",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    request_body = UpdateAttributesRequest,
    responses(
        (status = 200, description = "Attributes saved", body = AttributesResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid attribute value", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn update_attributes(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    body: Result<Json<UpdateAttributesRequest>, JsonRejection>,
) -> Result<Json<AttributesResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = extract_json(body)?;
    let update = state
        .engine
        .update_attributes(OrganizationId::from_uuid(org_id), req.attributes, actor)
        .await?;
    let record = update.record;
    Ok(Json(AttributesResponse {
        organization_id: org_id,
        attributes: record.attributes,
        updated_by: Some(record.updated_by.to_string()),
        updated_at: Some(record.updated_at),
        cache_refreshed: Some(update.cache_refreshed),
    }))
}

/// GET /v1/organizations/:org_id/mappings — Stored mapping rows.
#[utoipa::path(
    get,
    path = "/v1/organizations/{org_id}/mappings",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Rows ordered by requirement id", body = MappingListResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn list_mappings(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<MappingListResponse>, AppError> {
    let rows = state
        .engine
        .mappings_for_organization(OrganizationId::from_uuid(org_id))
        .await?;
    Ok(Json(rows.into()))
}

/// POST /v1/organizations/:org_id/requirements/:req_id/include — Manual include.
#[utoipa::path(
    post,
    path = "/v1/organizations/{org_id}/requirements/{req_id}/include",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("req_id" = Uuid, Path, description = "Requirement ID"),
    ),
    request_body = ManualDecisionRequest,
    responses(
        (status = 200, description = "Decision recorded", body = MappingView),
        (status = 404, description = "Organization or requirement not found", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason or actor", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn include(
    State(state): State<AppState>,
    Path((org_id, req_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    body: Result<Json<ManualDecisionRequest>, JsonRejection>,
) -> Result<Json<MappingView>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = extract_validated_json(body)?;
    let reason = Reason::required(req.reason.as_deref())?;
    let mapping = state
        .engine
        .include(
            OrganizationId::from_uuid(org_id),
            RequirementId::from_uuid(req_id),
            reason,
            actor,
        )
        .await?;
    state.metrics.manual_action("include");
    Ok(Json(mapping.into()))
}

/// POST /v1/organizations/:org_id/requirements/:req_id/exclude — Manual exclude.
#[utoipa::path(
    post,
    path = "/v1/organizations/{org_id}/requirements/{req_id}/exclude",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("req_id" = Uuid, Path, description = "Requirement ID"),
    ),
    request_body = ManualDecisionRequest,
    responses(
        (status = 200, description = "Decision recorded", body = MappingView),
        (status = 404, description = "Organization or requirement not found", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason or actor", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn exclude(
    State(state): State<AppState>,
    Path((org_id, req_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
    body: Result<Json<ManualDecisionRequest>, JsonRejection>,
) -> Result<Json<MappingView>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = extract_validated_json(body)?;
    let reason = Reason::required(req.reason.as_deref())?;
    let mapping = state
        .engine
        .exclude(
            OrganizationId::from_uuid(org_id),
            RequirementId::from_uuid(req_id),
            reason,
            actor,
        )
        .await?;
    state.metrics.manual_action("exclude");
    Ok(Json(mapping.into()))
}

/// DELETE /v1/organizations/:org_id/requirements/:req_id/mapping — Revert to automatic.
#[utoipa::path(
    delete,
    path = "/v1/organizations/{org_id}/requirements/{req_id}/mapping",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("req_id" = Uuid, Path, description = "Requirement ID"),
    ),
    responses(
        (status = 200, description = "Manual decision removed, or none existed", body = RevertResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn revert(
    State(state): State<AppState>,
    Path((org_id, req_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<RevertResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .engine
        .revert(
            OrganizationId::from_uuid(org_id),
            RequirementId::from_uuid(req_id),
            actor,
        )
        .await?;
    if outcome.removed {
        state.metrics.manual_action("revert");
    }
    Ok(Json(RevertResponse {
        removed: outcome.removed,
        mapping: outcome.mapping.map(MappingView::from),
        cache_refreshed: outcome.cache_refreshed,
    }))
}

/// GET /v1/organizations/:org_id/requirements/:req_id/history — Decision history.
#[utoipa::path(
    get,
    path = "/v1/organizations/{org_id}/requirements/{req_id}/history",
    params(
        ("org_id" = Uuid, Path, description = "Organization ID"),
        ("req_id" = Uuid, Path, description = "Requirement ID"),
    ),
    responses(
        (status = 200, description = "Events oldest first", body = HistoryResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn history(
    State(state): State<AppState>,
    Path((org_id, req_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<HistoryResponse>, AppError> {
    let events = state
        .engine
        .history(
            OrganizationId::from_uuid(org_id),
            RequirementId::from_uuid(req_id),
        )
        .await?;
    Ok(Json(HistoryResponse {
        count: events.len(),
        events,
    }))
}

/// POST /v1/organizations/:org_id/bulk-include — Include all requirements matching a filter.
#[utoipa::path(
    post,
    path = "/v1/organizations/{org_id}/bulk-include",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    request_body = BulkIncludeRequest,
    responses(
        (status = 200, description = "Batch committed", body = BulkIncludeResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
        (status = 422, description = "Empty filter, missing reason or actor", body = crate::error::ErrorBody),
        (status = 503, description = "Nothing was written", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn bulk_include(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    headers: HeaderMap,
    body: Result<Json<BulkIncludeRequest>, JsonRejection>,
) -> Result<Json<BulkIncludeResponse>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let req = extract_validated_json(body)?;
    let reason = Reason::required(req.reason.as_deref())?;
    let outcome = state
        .engine
        .add_by_filter(OrganizationId::from_uuid(org_id), &req.filter, reason, actor)
        .await?;
    state.metrics.bulk_committed(outcome.committed());
    Ok(Json(outcome.into()))
}

/// POST /v1/organizations/:org_id/reconcile — Bring the automatic cache in line.
#[utoipa::path(
    post,
    path = "/v1/organizations/{org_id}/reconcile",
    params(("org_id" = Uuid, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Cache reconciled", body = ReconcileResponse),
        (status = 404, description = "Organization not found", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn reconcile(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let report = state
        .engine
        .reconcile_organization(OrganizationId::from_uuid(org_id))
        .await?;
    state.metrics.reconciled(report.written, report.removed);
    Ok(Json(report.into()))
}
