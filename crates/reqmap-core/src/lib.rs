#![deny(missing_docs)]

//! # reqmap-core — Foundational Types for the Applicability Engine
//!
//! This crate defines the types every other crate in the workspace depends
//! on. It has no internal crate dependencies — only `serde`, `serde_json`,
//! `thiserror`, `chrono`, and `uuid` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** You cannot pass an
//!    [`OrganizationId`] where a [`RequirementId`] is expected, and a
//!    [`Reason`] is never an empty string.
//!
//! 2. **Ordinals are closed enums.** [`InfrastructureCategory`] and
//!    [`DataProtectionLevel`] accept only their enumerated ranks; any other
//!    integer is rejected at deserialization time.
//!
//! 3. **A manual mapping always carries a reason.** [`OrganizationMapping`]
//!    constructors take a [`Reason`] for the manual types, so a half-written
//!    manual decision is not representable through the public API.
//!
//! 4. **[`EngineError`] hierarchy.** Structured errors with `thiserror` that
//!    separate caller mistakes (validation, not found) from retryable
//!    infrastructure failures (conflict, persistence).

pub mod attributes;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod requirement;

// Re-export primary types at crate root for ergonomic imports.
pub use attributes::{
    AttributesRecord, DataProtectionLevel, InfrastructureCategory, Organization,
    OrganizationAttributes, SeverityRank,
};
pub use error::{EngineError, NotFoundError, PersistenceError, ResourceKind, ValidationError};
pub use identity::{Actor, AuditEventId, BatchId, MappingId, OrganizationId, Reason, RequirementId};
pub use mapping::{MappingType, OrganizationMapping};
pub use requirement::{Criticality, Requirement, RuleKind};
