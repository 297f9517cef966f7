//! # reqmap-engine — Applicability Resolution Engine
//!
//! Decides, for every (requirement, organization) pair, whether the
//! requirement is in force. An automatic rule evaluated against the
//! organization's attributes is overlaid with manually recorded decisions
//! into one explainable result set.
//!
//! ## Precedence
//!
//! ```text
//! manual_exclude  >  manual_include  >  fresh automatic match  >  not applicable
//! ```
//!
//! Stored `automatic` mapping rows are a cache kept for audit and listing.
//! The resolver never trusts them; it always re-evaluates the rule and
//! reports stale rows it sees. Reconciliation ([`reconcile`]) brings the
//! cache back in line after every attribute update, rule upsert, rule
//! delete and revert.
//!
//! ## Crate Layout
//!
//! - [`store`]: persistence seams (organizations, catalog, rules, mappings, audit log).
//! - [`memory`]: in-process store used in development and tests.
//! - [`rule`]: applicability rules and rule drafts.
//! - [`resolver`]: the pure reconciliation of rules, mappings and attributes.
//! - [`reconcile`]: automatic cache planning.
//! - [`audit`]: hash-chained applicability audit events.
//! - [`engine`]: [`ApplicabilityEngine`], the entry point for every operation.

pub mod audit;
pub mod engine;
pub mod memory;
pub mod reconcile;
pub mod resolver;
pub mod rule;
pub mod store;

mod actions;
mod rules;

pub use audit::{AuditDraft, AuditEvent, AuditEventKind, ChainVerification};
pub use engine::{
    ApplicabilityEngine, AttributesUpdate, BulkOutcome, ReconcileReport, RevertOutcome,
    RuleChange, RulePreview,
};
pub use memory::MemoryStore;
pub use reconcile::CacheChanges;
pub use resolver::{Origin, Resolution, ResolutionCounts, ResolvedRequirement};
pub use rule::{ApplicabilityRule, RuleDraft};
pub use store::{
    ApplicabilityStore, AuditLog, BatchWrite, CacheApplied, MappingStore, OrganizationStore,
    RequirementCatalog, RuleStore, StoreResult,
};
