//! # Applicability Audit Log
//!
//! The mapping table holds only the latest decision per pair. Every
//! transition (include, exclude, revert, bulk include, rule change,
//! attribute update, cache refresh) is also appended here.
//!
//! Events are hash-chained: each event's hash is
//! `SHA-256(previous_hash | sequence | kind | organization | requirement |
//! reason | actor | batch | recorded_at)`. The first event chains from the
//! zero hash. Stores seal drafts with [`AuditEvent::seal`] inside the same
//! atomic write as the change they describe.

use chrono::{DateTime, SubsecRound, Utc};
use reqmap_core::{
    Actor, AttributesRecord, AuditEventId, BatchId, MappingType, OrganizationId, OrganizationMapping,
    Reason, RequirementId,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rule::ApplicabilityRule;

/// Previous-hash value of the first event in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What kind of transition an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Manual include of one requirement.
    ManualInclude,
    /// Manual exclude of one requirement.
    ManualExclude,
    /// Manual include written by a bulk call.
    BulkInclude,
    /// Manual decision removed.
    Revert,
    /// Rule created or replaced.
    RuleUpserted,
    /// Rule deleted.
    RuleDeleted,
    /// Organization attributes changed.
    AttributesUpdated,
    /// Automatic cache row written by reconciliation.
    CacheWritten,
    /// Stale automatic cache row removed by reconciliation.
    CacheRemoved,
}

impl AuditEventKind {
    /// Return the string value used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualInclude => "manual_include",
            Self::ManualExclude => "manual_exclude",
            Self::BulkInclude => "bulk_include",
            Self::Revert => "revert",
            Self::RuleUpserted => "rule_upserted",
            Self::RuleDeleted => "rule_deleted",
            Self::AttributesUpdated => "attributes_updated",
            Self::CacheWritten => "cache_written",
            Self::CacheRemoved => "cache_removed",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "manual_include" => Self::ManualInclude,
            "manual_exclude" => Self::ManualExclude,
            "bulk_include" => Self::BulkInclude,
            "revert" => Self::Revert,
            "rule_upserted" => Self::RuleUpserted,
            "rule_deleted" => Self::RuleDeleted,
            "attributes_updated" => Self::AttributesUpdated,
            "cache_written" => Self::CacheWritten,
            "cache_removed" => Self::CacheRemoved,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event before the store assigns its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    /// Transition kind.
    pub kind: AuditEventKind,
    /// Organization concerned, if any.
    pub organization_id: Option<OrganizationId>,
    /// Requirement concerned, if any.
    pub requirement_id: Option<RequirementId>,
    /// Reason for manual decisions.
    pub reason: Option<Reason>,
    /// Who made the change.
    pub actor: Actor,
    /// Bulk call the change belongs to.
    pub batch_id: Option<BatchId>,
    /// When the change happened, truncated to microseconds.
    pub recorded_at: DateTime<Utc>,
}

impl AuditDraft {
    /// A draft with no subject, reason or batch.
    pub fn new(kind: AuditEventKind, actor: Actor, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            organization_id: None,
            requirement_id: None,
            reason: None,
            actor,
            batch_id: None,
            recorded_at: at.trunc_subsecs(6),
        }
    }

    /// Draft describing a manual mapping write.
    pub fn for_mapping(mapping: &OrganizationMapping) -> Self {
        let kind = match (mapping.mapping_type, mapping.batch_id) {
            (MappingType::ManualInclude, Some(_)) => AuditEventKind::BulkInclude,
            (MappingType::ManualInclude, None) => AuditEventKind::ManualInclude,
            (MappingType::ManualExclude, _) => AuditEventKind::ManualExclude,
            (MappingType::Automatic, _) => AuditEventKind::CacheWritten,
        };
        Self {
            organization_id: Some(mapping.organization_id),
            requirement_id: Some(mapping.requirement_id),
            reason: mapping.reason.clone(),
            batch_id: mapping.batch_id,
            ..Self::new(kind, mapping.updated_by.clone(), mapping.updated_at)
        }
    }

    /// Draft describing the removal of a mapping row.
    pub fn for_removal(
        kind: AuditEventKind,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            organization_id: Some(organization_id),
            requirement_id: Some(requirement_id),
            ..Self::new(kind, actor, at)
        }
    }

    /// Draft describing a rule write.
    pub fn for_rule(kind: AuditEventKind, rule: &ApplicabilityRule) -> Self {
        Self {
            requirement_id: Some(rule.requirement_id),
            ..Self::new(kind, rule.updated_by.clone(), rule.updated_at)
        }
    }

    /// Draft describing an attribute update.
    pub fn for_attributes(record: &AttributesRecord) -> Self {
        Self {
            organization_id: Some(record.organization_id),
            ..Self::new(
                AuditEventKind::AttributesUpdated,
                record.updated_by.clone(),
                record.updated_at,
            )
        }
    }
}

/// A sealed, hash-chained audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub id: AuditEventId,
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// Transition kind.
    pub kind: AuditEventKind,
    /// Organization concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    /// Requirement concerned, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_id: Option<RequirementId>,
    /// Reason for manual decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    /// Who made the change.
    pub actor: Actor,
    /// Bulk call the change belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    /// When the change happened.
    pub recorded_at: DateTime<Utc>,
    /// Hash of the preceding event.
    pub previous_hash: String,
    /// Hash of this event.
    pub event_hash: String,
}

impl AuditEvent {
    /// Seal a draft as the event following `previous`.
    pub fn seal(draft: AuditDraft, previous: Option<&AuditEvent>) -> Self {
        let (sequence, previous_hash) = match previous {
            Some(prev) => (prev.sequence + 1, prev.event_hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        let mut event = Self {
            id: AuditEventId::new(),
            sequence,
            kind: draft.kind,
            organization_id: draft.organization_id,
            requirement_id: draft.requirement_id,
            reason: draft.reason,
            actor: draft.actor,
            batch_id: draft.batch_id,
            recorded_at: draft.recorded_at,
            previous_hash,
            event_hash: String::new(),
        };
        event.event_hash = event.compute_hash();
        event
    }

    /// Recompute this event's hash from its fields.
    pub fn compute_hash(&self) -> String {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        let input = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.previous_hash,
            self.sequence,
            self.kind.as_str(),
            opt(&self.organization_id),
            opt(&self.requirement_id),
            opt(&self.reason),
            self.actor,
            opt(&self.batch_id),
            self.recorded_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        );
        sha256_hex(&input)
    }
}

/// Result of walking the audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Number of events inspected.
    pub total_events: usize,
    /// Events whose `previous_hash` or sequence does not follow the prior event.
    pub broken_links: usize,
    /// Events whose stored hash does not match their fields.
    pub tampered_events: usize,
    /// No broken links and no tampered events.
    pub chain_valid: bool,
}

/// Verify hash continuity and per-event integrity of an ordered chain.
pub fn verify_chain(events: &[AuditEvent]) -> ChainVerification {
    let mut broken_links = 0;
    let mut tampered_events = 0;
    let mut expected_prev = GENESIS_HASH;
    let mut expected_seq = 1;

    for event in events {
        if event.previous_hash != expected_prev || event.sequence != expected_seq {
            broken_links += 1;
        }
        if event.compute_hash() != event.event_hash {
            tampered_events += 1;
        }
        expected_prev = event.event_hash.as_str();
        expected_seq = event.sequence + 1;
    }

    ChainVerification {
        total_events: events.len(),
        broken_links,
        tampered_events,
        chain_valid: broken_links == 0 && tampered_events == 0,
    }
}

/// Compute SHA-256 hex digest of input string.
fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
