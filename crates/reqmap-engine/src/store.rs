//! # Persistence Seams
//!
//! The engine is stateless compute over records owned by a store. These
//! traits are the only contract it needs. Implementations must enforce the
//! uniqueness invariants (one rule per requirement, one mapping per
//! requirement × organization pair) and must never turn a failure into an
//! empty result.
//!
//! Stores fail with [`EngineError::Persistence`] when the backend is
//! unavailable and [`EngineError::Conflict`] when a write violates a
//! uniqueness constraint the upsert could not absorb. No other variant is
//! returned by a store.
//!
//! Every write that changes applicability state appends its audit events
//! in the same atomic step, sealed with [`AuditEvent::seal`].

use std::future::Future;

use reqmap_core::{
    Actor, AttributesRecord, EngineError, Organization, OrganizationId, OrganizationMapping,
    Requirement, RequirementId,
};

use crate::audit::AuditEvent;
use crate::reconcile::CacheChanges;
use crate::rule::ApplicabilityRule;

/// Result type of every store call.
pub type StoreResult<T> = Result<T, EngineError>;

/// Outcome of an atomic batch of mapping upserts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWrite {
    /// Pairs that had no row before.
    pub created: usize,
    /// Pairs whose existing row was replaced.
    pub updated: usize,
}

/// Outcome of applying planned cache changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheApplied {
    /// Automatic rows inserted.
    pub written: usize,
    /// Automatic rows deleted.
    pub removed: usize,
}

/// Organizations and their attributes.
pub trait OrganizationStore: Send + Sync {
    /// Look up an organization.
    fn get_organization(
        &self,
        id: OrganizationId,
    ) -> impl Future<Output = StoreResult<Option<Organization>>> + Send;

    /// Every known organization.
    fn list_organizations(&self) -> impl Future<Output = StoreResult<Vec<Organization>>> + Send;

    /// The organization's current attributes, if any were ever recorded.
    fn get_attributes(
        &self,
        id: OrganizationId,
    ) -> impl Future<Output = StoreResult<Option<AttributesRecord>>> + Send;

    /// Every recorded attributes row.
    fn list_attributes(&self) -> impl Future<Output = StoreResult<Vec<AttributesRecord>>> + Send;

    /// Replace an organization's attributes and append an `attributes_updated` event.
    fn put_attributes(&self, record: AttributesRecord) -> impl Future<Output = StoreResult<()>> + Send;
}

/// The requirement catalog.
pub trait RequirementCatalog: Send + Sync {
    /// Look up a requirement.
    fn get_requirement(
        &self,
        id: RequirementId,
    ) -> impl Future<Output = StoreResult<Option<Requirement>>> + Send;

    /// Every requirement in the catalog.
    fn list_requirements(&self) -> impl Future<Output = StoreResult<Vec<Requirement>>> + Send;
}

/// Applicability rules, at most one per requirement.
pub trait RuleStore: Send + Sync {
    /// The rule for a requirement.
    fn get_rule(
        &self,
        requirement_id: RequirementId,
    ) -> impl Future<Output = StoreResult<Option<ApplicabilityRule>>> + Send;

    /// Every stored rule.
    fn list_rules(&self) -> impl Future<Output = StoreResult<Vec<ApplicabilityRule>>> + Send;

    /// Insert or replace the rule keyed on its requirement, keeping the
    /// original creation stamp. Appends a `rule_upserted` event.
    fn upsert_rule(
        &self,
        rule: ApplicabilityRule,
    ) -> impl Future<Output = StoreResult<ApplicabilityRule>> + Send;

    /// Delete the rule for a requirement, returning it if it existed.
    /// Appends a `rule_deleted` event when something was removed.
    fn delete_rule(
        &self,
        requirement_id: RequirementId,
        actor: Actor,
    ) -> impl Future<Output = StoreResult<Option<ApplicabilityRule>>> + Send;
}

/// Organization mappings, at most one per requirement × organization pair.
pub trait MappingStore: Send + Sync {
    /// Every row for an organization.
    fn mappings_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> impl Future<Output = StoreResult<Vec<OrganizationMapping>>> + Send;

    /// Every row for a requirement.
    fn mappings_for_requirement(
        &self,
        requirement_id: RequirementId,
    ) -> impl Future<Output = StoreResult<Vec<OrganizationMapping>>> + Send;

    /// Insert or replace the row for the mapping's pair as one conditional
    /// write, keeping the existing row id and creation stamp.
    fn upsert_mapping(
        &self,
        mapping: OrganizationMapping,
    ) -> impl Future<Output = StoreResult<OrganizationMapping>> + Send;

    /// Upsert every mapping atomically: either all rows and their audit
    /// events are written, or none are.
    fn upsert_mappings(
        &self,
        mappings: Vec<OrganizationMapping>,
    ) -> impl Future<Output = StoreResult<BatchWrite>> + Send;

    /// Delete the pair's row only if it is a manual decision. Appends a
    /// `revert` event when something was removed.
    fn delete_manual_mapping(
        &self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        actor: Actor,
    ) -> impl Future<Output = StoreResult<Option<OrganizationMapping>>> + Send;

    /// Apply planned cache changes atomically. Inserts happen only where
    /// the pair has no row; removals only where the row is still
    /// `automatic`. Manual rows written concurrently are never touched.
    fn apply_cache_changes(
        &self,
        changes: CacheChanges,
    ) -> impl Future<Output = StoreResult<CacheApplied>> + Send;
}

/// Read side of the applicability audit log.
pub trait AuditLog: Send + Sync {
    /// Events for one pair, oldest first.
    fn history(
        &self,
        organization_id: OrganizationId,
        requirement_id: RequirementId,
    ) -> impl Future<Output = StoreResult<Vec<AuditEvent>>> + Send;

    /// The whole chain in sequence order.
    fn audit_events(&self) -> impl Future<Output = StoreResult<Vec<AuditEvent>>> + Send;
}

/// Everything the engine needs from persistence.
pub trait ApplicabilityStore:
    OrganizationStore + RequirementCatalog + RuleStore + MappingStore + AuditLog
{
}

impl<T> ApplicabilityStore for T where
    T: OrganizationStore + RequirementCatalog + RuleStore + MappingStore + AuditLog
{
}
