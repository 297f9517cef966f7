//! # Organization Mappings
//!
//! An [`OrganizationMapping`] is the explicit decision for one
//! (requirement, organization) pair. At most one row exists per pair; every
//! write is an upsert keyed on that composite.
//!
//! ## Manual vs. Automatic Rows
//!
//! `manual_include` and `manual_exclude` are decisions and always carry a
//! [`Reason`]. `automatic` rows are a cache of a positive automatic match,
//! kept for audit and listing. They never carry a reason and are never
//! authoritative: the resolver always re-evaluates the rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{Actor, BatchId, MappingId, OrganizationId, Reason, RequirementId};

/// The kind of decision a mapping row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// Cached record of a positive automatic match.
    Automatic,
    /// Organization chose to be subject to the requirement.
    ManualInclude,
    /// Organization is exempted from the requirement.
    ManualExclude,
}

impl MappingType {
    /// Return the string value used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::ManualInclude => "manual_include",
            Self::ManualExclude => "manual_exclude",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual_include" => Some(Self::ManualInclude),
            "manual_exclude" => Some(Self::ManualExclude),
            _ => None,
        }
    }

    /// Manual types are decisions and require a reason.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::ManualInclude | Self::ManualExclude)
    }
}

impl std::fmt::Display for MappingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored decision for a (requirement, organization) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationMapping {
    /// Row identifier. Preserved across upserts of the same pair.
    pub id: MappingId,
    /// Requirement half of the composite key.
    pub requirement_id: RequirementId,
    /// Organization half of the composite key.
    pub organization_id: OrganizationId,
    /// Decision kind.
    pub mapping_type: MappingType,
    /// Justification, present exactly when the type is manual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    /// Who first created the row for this pair.
    pub created_by: Actor,
    /// Who made the current decision.
    pub updated_by: Actor,
    /// Bulk call that wrote the current decision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the current decision was made.
    pub updated_at: DateTime<Utc>,
}

impl OrganizationMapping {
    /// A fresh manual decision for a pair.
    pub fn manual(
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        mapping_type: MappingType,
        reason: Reason,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if !mapping_type.is_manual() {
            return Err(ValidationError::InvalidMapping(format!(
                "{mapping_type} is not a manual mapping type"
            )));
        }
        Ok(Self {
            id: MappingId::new(),
            requirement_id,
            organization_id,
            mapping_type,
            reason: Some(reason),
            created_by: actor.clone(),
            updated_by: actor,
            batch_id: None,
            created_at: at,
            updated_at: at,
        })
    }

    /// A cache row recording a positive automatic match.
    pub fn automatic(
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MappingId::new(),
            requirement_id,
            organization_id,
            mapping_type: MappingType::Automatic,
            reason: None,
            created_by: Actor::system(),
            updated_by: Actor::system(),
            batch_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Stamp the row with the bulk call that wrote it.
    pub fn with_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Composite key of the row.
    pub fn key(&self) -> (RequirementId, OrganizationId) {
        (self.requirement_id, self.organization_id)
    }

    /// Whether the row is a manual decision.
    pub fn is_manual(&self) -> bool {
        self.mapping_type.is_manual()
    }

    /// Check the reason invariant: manual rows carry one, automatic rows do not.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.mapping_type.is_manual(), &self.reason) {
            (true, None) => Err(ValidationError::MissingReason),
            (false, Some(_)) => Err(ValidationError::InvalidMapping(
                "automatic mappings do not carry a reason".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Merge a new decision into an existing row for the same pair.
    ///
    /// Keeps the row id and creation stamp of `existing`; everything that
    /// describes the decision comes from `self`.
    pub fn replacing(self, existing: &OrganizationMapping) -> Self {
        Self {
            id: existing.id,
            created_by: existing.created_by.clone(),
            created_at: existing.created_at,
            ..self
        }
    }
}
