//! # API Route Modules
//!
//! - `organizations` — per-organization resolution, attributes, manual
//!   decisions (include, exclude, revert), bulk inclusion, mapping listing,
//!   decision history and explicit reconciliation.
//! - `requirements` — rule administration, rule preview, per-requirement
//!   mapping listing and reconciliation.
//! - `audit` — audit chain verification.
//!
//! Shared response views live here so every module renders mapping rows
//! the same way.

pub mod audit;
pub mod organizations;
pub mod requirements;

use chrono::{DateTime, Utc};
use reqmap_core::OrganizationMapping;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One stored mapping row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MappingView {
    pub id: Uuid,
    pub requirement_id: Uuid,
    pub organization_id: Uuid,
    /// `automatic`, `manual_include` or `manual_exclude`.
    pub mapping_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_by: String,
    pub updated_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrganizationMapping> for MappingView {
    fn from(m: OrganizationMapping) -> Self {
        Self {
            id: *m.id.as_uuid(),
            requirement_id: *m.requirement_id.as_uuid(),
            organization_id: *m.organization_id.as_uuid(),
            mapping_type: m.mapping_type.as_str().to_string(),
            reason: m.reason.map(|r| r.as_str().to_string()),
            created_by: m.created_by.to_string(),
            updated_by: m.updated_by.to_string(),
            batch_id: m.batch_id.map(|b| *b.as_uuid()),
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// A list of mapping rows.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MappingListResponse {
    pub mappings: Vec<MappingView>,
    pub count: usize,
}

impl From<Vec<OrganizationMapping>> for MappingListResponse {
    fn from(rows: Vec<OrganizationMapping>) -> Self {
        let mappings: Vec<MappingView> = rows.into_iter().map(MappingView::from).collect();
        Self {
            count: mappings.len(),
            mappings,
        }
    }
}

/// Automatic cache rows changed by an explicit reconcile.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    pub written: usize,
    pub removed: usize,
}

impl From<reqmap_engine::ReconcileReport> for ReconcileResponse {
    fn from(report: reqmap_engine::ReconcileReport) -> Self {
        Self {
            written: report.written,
            removed: report.removed,
        }
    }
}
