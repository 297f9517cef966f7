//! # Resolver
//!
//! The pure reconciliation of current rules, current mappings and current
//! attributes into the effective requirement list for one organization.
//! No I/O happens here; [`crate::ApplicabilityEngine`] loads the inputs.
//!
//! ## Precedence (highest first)
//!
//! 1. `manual_exclude` row: excluded, whatever the rule says.
//! 2. `manual_include` row: included with origin `manual_include`.
//! 3. Fresh auto-match: included with origin `automatic`.
//! 4. Otherwise: not applicable, not returned.
//!
//! A stored `automatic` row is never consulted for the decision. When the
//! fresh evaluation disagrees with it, the row is counted as stale.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use reqmap_core::{
    Actor, BatchId, MappingType, OrganizationAttributes, OrganizationId, OrganizationMapping,
    Reason, Requirement, RequirementId,
};
use serde::{Deserialize, Serialize};

use crate::rule::ApplicabilityRule;

/// Which decision made a requirement applicable or suppressed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Included by a fresh automatic match.
    Automatic,
    /// Included by a manual decision.
    ManualInclude,
    /// Suppressed by a manual decision.
    ManualExclude,
}

impl Origin {
    /// Return the string value used in responses and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::ManualInclude => "manual_include",
            Self::ManualExclude => "manual_exclude",
        }
    }
}

/// One requirement in a resolution, with the decision that placed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRequirement {
    /// The catalog record.
    pub requirement: Requirement,
    /// Winning decision.
    pub origin: Origin,
    /// Fresh rule evaluation, reported even when a manual decision won.
    pub auto_match: bool,
    /// Justification of a manual decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    /// Who made the manual decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<Actor>,
    /// When the manual decision was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// Bulk call that wrote the manual decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
}

/// Aggregate counts over one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionCounts {
    /// Requirements in the catalog.
    pub total_requirements: usize,
    /// Included requirements.
    pub applicable: usize,
    /// Included by a fresh automatic match.
    pub automatic: usize,
    /// Included by a manual decision.
    pub manual_include: usize,
    /// Suppressed by a manual decision.
    pub manual_exclude: usize,
    /// Stored `automatic` rows the fresh evaluation no longer supports.
    pub stale_automatic_rows: usize,
}

/// The effective requirement set for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Organization the set was resolved for.
    pub organization_id: OrganizationId,
    /// Applicable requirements ordered by requirement id.
    pub requirements: Vec<ResolvedRequirement>,
    /// Manually excluded requirements ordered by requirement id.
    pub excluded: Vec<ResolvedRequirement>,
    /// Aggregate counts.
    pub counts: ResolutionCounts,
}

impl Resolution {
    /// The resolved entry for a requirement, included or excluded.
    pub fn find(&self, requirement_id: RequirementId) -> Option<&ResolvedRequirement> {
        self.requirements
            .iter()
            .chain(self.excluded.iter())
            .find(|r| r.requirement.id == requirement_id)
    }

    /// Whether the requirement is in the applicable set.
    pub fn includes(&self, requirement_id: RequirementId) -> bool {
        self.requirements
            .iter()
            .any(|r| r.requirement.id == requirement_id)
    }
}

/// Resolve the effective requirement set for one organization.
///
/// `attributes` is `None` when the organization has no attributes record;
/// the conservative default is used. Mappings for requirements no longer
/// in the catalog are ignored.
pub fn resolve(
    organization_id: OrganizationId,
    attributes: Option<&OrganizationAttributes>,
    requirements: &[Requirement],
    rules: &HashMap<RequirementId, ApplicabilityRule>,
    mappings: &[OrganizationMapping],
) -> Resolution {
    let unknown = OrganizationAttributes::default();
    let attributes = attributes.unwrap_or(&unknown);

    let catalog: BTreeMap<RequirementId, &Requirement> =
        requirements.iter().map(|r| (r.id, r)).collect();
    let mut rows: HashMap<RequirementId, &OrganizationMapping> = HashMap::new();
    for mapping in mappings
        .iter()
        .filter(|m| m.organization_id == organization_id)
    {
        if catalog.contains_key(&mapping.requirement_id) {
            rows.insert(mapping.requirement_id, mapping);
        } else {
            tracing::warn!(
                organization_id = %organization_id,
                requirement_id = %mapping.requirement_id,
                mapping_type = mapping.mapping_type.as_str(),
                "ignoring mapping for requirement not in catalog"
            );
        }
    }

    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut counts = ResolutionCounts {
        total_requirements: catalog.len(),
        ..Default::default()
    };

    for (id, requirement) in catalog {
        let auto_match = rules
            .get(&id)
            .is_some_and(|rule| rule.auto_matches(attributes));
        let row = rows.get(&id).copied();
        tracing::debug!(
            organization_id = %organization_id,
            requirement_id = %id,
            auto_match,
            mapping_type = row.map(|r| r.mapping_type.as_str()),
            "evaluated requirement"
        );

        match row.map(|r| r.mapping_type) {
            Some(MappingType::ManualExclude) => {
                excluded.push(manual_entry(requirement, Origin::ManualExclude, auto_match, row));
                counts.manual_exclude += 1;
            }
            Some(MappingType::ManualInclude) => {
                included.push(manual_entry(requirement, Origin::ManualInclude, auto_match, row));
                counts.manual_include += 1;
            }
            cached => {
                if cached == Some(MappingType::Automatic) && !auto_match {
                    tracing::warn!(
                        organization_id = %organization_id,
                        requirement_id = %id,
                        "stale automatic cache row; fresh evaluation does not match"
                    );
                    counts.stale_automatic_rows += 1;
                }
                if auto_match {
                    included.push(ResolvedRequirement {
                        requirement: requirement.clone(),
                        origin: Origin::Automatic,
                        auto_match,
                        reason: None,
                        decided_by: None,
                        decided_at: None,
                        batch_id: None,
                    });
                    counts.automatic += 1;
                }
            }
        }
    }

    counts.applicable = included.len();
    Resolution {
        organization_id,
        requirements: included,
        excluded,
        counts,
    }
}

fn manual_entry(
    requirement: &Requirement,
    origin: Origin,
    auto_match: bool,
    row: Option<&OrganizationMapping>,
) -> ResolvedRequirement {
    ResolvedRequirement {
        requirement: requirement.clone(),
        origin,
        auto_match,
        reason: row.and_then(|r| r.reason.clone()),
        decided_by: row.map(|r| r.updated_by.clone()),
        decided_at: row.map(|r| r.updated_at),
        batch_id: row.and_then(|r| r.batch_id),
    }
}
