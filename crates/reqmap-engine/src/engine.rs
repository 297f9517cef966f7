//! # Applicability Engine
//!
//! [`ApplicabilityEngine`] is the entry point for every operation. It owns
//! a store and holds no other state; every call is an independent,
//! request-scoped operation over the store's current records.
//!
//! Operations are split across modules by concern:
//!
//! - here: resolve, attribute updates, reconciliation, listing, audit.
//! - `actions`: manual include / exclude / revert and bulk inclusion.
//! - `rules`: rule administration and preview.
//!
//! Store failures surface as [`EngineError::Persistence`]; the engine never
//! reports an empty result in place of a failed read. A write that commits
//! and then fails to refresh the automatic cache still succeeds: the outcome
//! carries `cache_refreshed: false` and a later reconcile repairs the rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqmap_core::{
    Actor, AttributesRecord, BatchId, EngineError, Organization, OrganizationAttributes,
    OrganizationId, OrganizationMapping, Requirement, RequirementId, ResourceKind,
};
use serde::{Deserialize, Serialize};

use crate::audit::{self, AuditEvent, ChainVerification};
use crate::reconcile::{self, CacheChanges};
use crate::resolver::{self, Resolution};
use crate::rule::ApplicabilityRule;
use crate::store::ApplicabilityStore;

/// Cache rows changed by a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Automatic rows inserted.
    pub written: usize,
    /// Stale automatic rows removed.
    pub removed: usize,
}

/// Result of reverting a manual decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertOutcome {
    /// Whether a manual row existed and was deleted.
    pub removed: bool,
    /// The deleted row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<OrganizationMapping>,
    /// Whether the pair's cache row was brought up to date afterwards.
    pub cache_refreshed: bool,
}

/// A committed rule save or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    /// The saved rule, or the deleted one.
    pub rule: ApplicabilityRule,
    /// Whether the requirement's cache rows were reconciled afterwards.
    pub cache_refreshed: bool,
}

/// A committed attributes update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributesUpdate {
    pub record: AttributesRecord,
    /// Whether the organization's cache rows were reconciled afterwards.
    pub cache_refreshed: bool,
}

/// Result of a bulk filter-driven inclusion.
///
/// `created + updated` is the number of mappings actually committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    /// Shared identifier stamped on every mapping of the call.
    pub batch_id: BatchId,
    /// Requirements selected by the filter.
    pub matched: usize,
    /// Pairs that had no row before.
    pub created: usize,
    /// Pairs whose row was replaced.
    pub updated: usize,
    /// Shared decision timestamp.
    pub decided_at: DateTime<Utc>,
}

impl BulkOutcome {
    /// Mappings committed by the call.
    pub fn committed(&self) -> usize {
        self.created + self.updated
    }
}

/// Organizations a filter would match, computed without saving a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePreview {
    /// Organizations evaluated.
    pub evaluated: usize,
    /// Matching organizations ordered by id.
    pub matched: Vec<OrganizationId>,
}

/// The applicability resolution engine over a store `S`.
#[derive(Debug, Clone)]
pub struct ApplicabilityEngine<S> {
    pub(crate) store: S,
}

impl<S: ApplicabilityStore> ApplicabilityEngine<S> {
    /// Create an engine over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve the effective requirement set for an organization.
    ///
    /// Read-only: stale cache rows are reported in the counts, never fixed.
    pub async fn resolve_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Resolution, EngineError> {
        self.require_organization(organization_id).await?;
        let attributes = self.store.get_attributes(organization_id).await?;
        let requirements = self.store.list_requirements().await?;
        let rules = rules_by_requirement(self.store.list_rules().await?);
        let mappings = self.store.mappings_for_organization(organization_id).await?;

        let resolution = resolver::resolve(
            organization_id,
            attributes.as_ref().map(|r| &r.attributes),
            &requirements,
            &rules,
            &mappings,
        );
        tracing::debug!(
            organization_id = %organization_id,
            applicable = resolution.counts.applicable,
            excluded = resolution.counts.manual_exclude,
            stale = resolution.counts.stale_automatic_rows,
            "resolved applicable requirements"
        );
        Ok(resolution)
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    /// The organization's current attributes record, if any.
    pub async fn get_attributes(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<AttributesRecord>, EngineError> {
        self.require_organization(organization_id).await?;
        Ok(self.store.get_attributes(organization_id).await?)
    }

    /// Replace an organization's attributes, then reconcile its cache.
    ///
    /// Only the attributes write decides success.
    pub async fn update_attributes(
        &self,
        organization_id: OrganizationId,
        attributes: OrganizationAttributes,
        actor: Actor,
    ) -> Result<AttributesUpdate, EngineError> {
        self.require_organization(organization_id).await?;
        let record = AttributesRecord {
            organization_id,
            attributes,
            updated_by: actor,
            updated_at: Utc::now(),
        };
        self.store.put_attributes(record.clone()).await?;
        tracing::info!(
            organization_id = %organization_id,
            updated_by = %record.updated_by,
            "organization attributes updated"
        );
        let cache_refreshed = match self.reconcile_organization(organization_id).await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    organization_id = %organization_id,
                    error = %err,
                    "cache refresh failed after attributes update"
                );
                false
            }
        };
        Ok(AttributesUpdate {
            record,
            cache_refreshed,
        })
    }

    // -----------------------------------------------------------------------
    // Cache reconciliation
    // -----------------------------------------------------------------------

    /// Bring an organization's automatic cache rows in line with fresh evaluation.
    pub async fn reconcile_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<ReconcileReport, EngineError> {
        self.require_organization(organization_id).await?;
        let attributes = self
            .store
            .get_attributes(organization_id)
            .await?
            .map(|r| r.attributes)
            .unwrap_or_default();
        let requirements = self.store.list_requirements().await?;
        let rules = rules_by_requirement(self.store.list_rules().await?);
        let mappings = self.store.mappings_for_organization(organization_id).await?;

        let changes = reconcile::plan_for_organization(
            organization_id,
            &attributes,
            &requirements,
            &rules,
            &mappings,
            Utc::now(),
        );
        let report = self.apply(changes).await?;
        if report != ReconcileReport::default() {
            tracing::info!(
                organization_id = %organization_id,
                written = report.written,
                removed = report.removed,
                "reconciled automatic cache for organization"
            );
        }
        Ok(report)
    }

    /// Bring one requirement's automatic cache rows in line across all organizations.
    pub async fn reconcile_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> Result<ReconcileReport, EngineError> {
        self.require_requirement(requirement_id).await?;
        self.refresh_requirement_cache(requirement_id).await
    }

    /// Reconcile a requirement's cache without requiring it to be in the catalog.
    pub(crate) async fn refresh_requirement_cache(
        &self,
        requirement_id: RequirementId,
    ) -> Result<ReconcileReport, EngineError> {
        let rule = self.store.get_rule(requirement_id).await?;
        let organizations = self.store.list_organizations().await?;
        let attributes: HashMap<OrganizationId, OrganizationAttributes> = self
            .store
            .list_attributes()
            .await?
            .into_iter()
            .map(|r| (r.organization_id, r.attributes))
            .collect();
        let mappings = self.store.mappings_for_requirement(requirement_id).await?;

        let changes = reconcile::plan_for_requirement(
            requirement_id,
            rule.as_ref(),
            &organizations,
            &attributes,
            &mappings,
            Utc::now(),
        );
        let report = self.apply(changes).await?;
        if report != ReconcileReport::default() {
            tracing::info!(
                requirement_id = %requirement_id,
                written = report.written,
                removed = report.removed,
                "reconciled automatic cache for requirement"
            );
        }
        Ok(report)
    }

    /// Reconcile a single pair after its manual decision was removed.
    pub(crate) async fn refresh_pair(
        &self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
    ) -> Result<ReconcileReport, EngineError> {
        let attributes = self
            .store
            .get_attributes(organization_id)
            .await?
            .map(|r| r.attributes)
            .unwrap_or_default();
        let auto_match = match self.store.get_requirement(requirement_id).await? {
            Some(_) => self
                .store
                .get_rule(requirement_id)
                .await?
                .is_some_and(|rule| rule.auto_matches(&attributes)),
            None => false,
        };
        let row = self
            .store
            .mappings_for_organization(organization_id)
            .await?
            .into_iter()
            .find(|m| m.requirement_id == requirement_id);

        let changes = reconcile::plan_for_pair(
            requirement_id,
            organization_id,
            auto_match,
            row.as_ref(),
            Utc::now(),
        );
        self.apply(changes).await
    }

    async fn apply(&self, changes: CacheChanges) -> Result<ReconcileReport, EngineError> {
        if changes.is_empty() {
            return Ok(ReconcileReport::default());
        }
        let applied = self.store.apply_cache_changes(changes).await?;
        Ok(ReconcileReport {
            written: applied.written,
            removed: applied.removed,
        })
    }

    // -----------------------------------------------------------------------
    // Listing and audit
    // -----------------------------------------------------------------------

    /// Stored rows for an organization, ordered by requirement id.
    pub async fn mappings_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<OrganizationMapping>, EngineError> {
        self.require_organization(organization_id).await?;
        let mut rows = self.store.mappings_for_organization(organization_id).await?;
        rows.sort_by_key(|m| m.requirement_id);
        Ok(rows)
    }

    /// Stored rows for a requirement, ordered by organization id.
    pub async fn mappings_for_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> Result<Vec<OrganizationMapping>, EngineError> {
        self.require_requirement(requirement_id).await?;
        let mut rows = self.store.mappings_for_requirement(requirement_id).await?;
        rows.sort_by_key(|m| m.organization_id);
        Ok(rows)
    }

    /// Audit events for one pair, oldest first.
    pub async fn history(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
    ) -> Result<Vec<AuditEvent>, EngineError> {
        self.require_organization(organization_id).await?;
        Ok(self.store.history(organization_id, requirement_id).await?)
    }

    /// Walk the whole audit chain and check its integrity.
    pub async fn verify_audit_chain(&self) -> Result<ChainVerification, EngineError> {
        let events = self.store.audit_events().await?;
        let verification = audit::verify_chain(&events);
        if !verification.chain_valid {
            tracing::warn!(
                broken_links = verification.broken_links,
                tampered_events = verification.tampered_events,
                "audit chain verification failed"
            );
        }
        Ok(verification)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub(crate) async fn require_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Organization, EngineError> {
        self.store
            .get_organization(id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Organization, id))
    }

    pub(crate) async fn require_requirement(
        &self,
        id: RequirementId,
    ) -> Result<Requirement, EngineError> {
        self.store
            .get_requirement(id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Requirement, id))
    }
}

pub(crate) fn rules_by_requirement(
    rules: Vec<ApplicabilityRule>,
) -> HashMap<RequirementId, ApplicabilityRule> {
    rules.into_iter().map(|r| (r.requirement_id, r)).collect()
}
