//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the whole API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "reqmap API — Requirement Applicability Engine",
        version = "0.3.0",
        description = "Decides which compliance requirements apply to which organizations.\n\nProvides:\n- **Resolution** of an organization's effective requirement list from automatic rules and manual decisions\n- **Manual decisions** (include, exclude, revert) with mandatory justification and a hash-chained audit trail\n- **Bulk inclusion** of every catalog requirement matching a framework, criticality or category filter\n- **Rule administration** with side-effect-free preview\n- **Cache reconciliation** of automatic mapping rows\n\nEvery mutation requires the `X-Actor` header naming the user or system that made the change.",
        license(name = "BUSL-1.1")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    paths(
        // ── Organizations ────────────────────────────────────────────────
        crate::routes::organizations::resolve,
        crate::routes::organizations::get_attributes,
        crate::routes::organizations::update_attributes,
        crate::routes::organizations::list_mappings,
        crate::routes::organizations::include,
        crate::routes::organizations::exclude,
        crate::routes::organizations::revert,
        crate::routes::organizations::history,
        crate::routes::organizations::bulk_include,
        crate::routes::organizations::reconcile,
        // ── Rules ────────────────────────────────────────────────────────
        crate::routes::requirements::get_rule,
        crate::routes::requirements::upsert_rule,
        crate::routes::requirements::delete_rule,
        crate::routes::requirements::list_mappings,
        crate::routes::requirements::reconcile,
        crate::routes::requirements::preview_rule,
        // ── Audit ────────────────────────────────────────────────────────
        crate::routes::audit::verify_chain,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::MappingView,
            crate::routes::MappingListResponse,
            crate::routes::ReconcileResponse,
            // ── Organization DTOs ────────────────────────────────────────
            crate::routes::organizations::ResolutionResponse,
            crate::routes::organizations::AttributesResponse,
            crate::routes::organizations::UpdateAttributesRequest,
            crate::routes::organizations::ManualDecisionRequest,
            crate::routes::organizations::RevertResponse,
            crate::routes::organizations::BulkIncludeRequest,
            crate::routes::organizations::BulkIncludeResponse,
            crate::routes::organizations::HistoryResponse,
            // ── Rule DTOs ────────────────────────────────────────────────
            crate::routes::requirements::UpsertRuleRequest,
            crate::routes::requirements::RuleResponse,
            crate::routes::requirements::PreviewRequest,
            crate::routes::requirements::PreviewResponse,
            // ── Audit DTOs ───────────────────────────────────────────────
            crate::routes::audit::ChainVerificationResponse,
        ),
    ),
    tags(
        (name = "organizations", description = "Requirement resolution, attributes, manual decisions, bulk inclusion and history per organization"),
        (name = "rules", description = "Applicability rule administration, preview and per-requirement reconciliation"),
        (name = "audit", description = "Hash-chained audit trail verification"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
