//! # Automatic Cache Reconciliation
//!
//! Plans the changes that bring stored `automatic` mapping rows in line
//! with a fresh evaluation:
//!
//! | fresh auto-match | stored row        | change          |
//! |------------------|-------------------|-----------------|
//! | true             | none              | insert `automatic` |
//! | false            | `automatic`       | remove          |
//! | any              | manual            | none            |
//! | true             | `automatic`       | none            |
//!
//! Rows whose requirement left the catalog, or whose organization is no
//! longer known, count as non-matching. Planning is pure; stores apply the
//! plan with [`crate::MappingStore::apply_cache_changes`].
//!
//! Plans are ordered by (requirement, organization) so concurrent passes
//! lock rows in the same order.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use reqmap_core::{
    MappingType, Organization, OrganizationAttributes, OrganizationId, OrganizationMapping,
    Requirement, RequirementId,
};

use crate::rule::ApplicabilityRule;

/// Planned cache changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheChanges {
    /// Automatic rows to insert where the pair has no row.
    pub insert: Vec<OrganizationMapping>,
    /// Pairs whose `automatic` row is stale.
    pub remove: Vec<(RequirementId, OrganizationId)>,
}

impl CacheChanges {
    /// Nothing to do.
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.remove.is_empty()
    }

    fn into_ordered(mut self) -> Self {
        self.insert.sort_by_key(|m| (m.requirement_id, m.organization_id));
        self.remove.sort();
        self
    }

    fn consider(
        &mut self,
        requirement_id: RequirementId,
        organization_id: OrganizationId,
        auto_match: bool,
        row: Option<&OrganizationMapping>,
        at: DateTime<Utc>,
    ) {
        match (auto_match, row.map(|r| r.mapping_type)) {
            (true, None) => self
                .insert
                .push(OrganizationMapping::automatic(requirement_id, organization_id, at)),
            (false, Some(MappingType::Automatic)) => {
                self.remove.push((requirement_id, organization_id))
            }
            _ => {}
        }
    }
}

/// Plan cache changes for one organization across the whole catalog.
pub fn plan_for_organization(
    organization_id: OrganizationId,
    attributes: &OrganizationAttributes,
    requirements: &[Requirement],
    rules: &HashMap<RequirementId, ApplicabilityRule>,
    mappings: &[OrganizationMapping],
    at: DateTime<Utc>,
) -> CacheChanges {
    let rows: HashMap<RequirementId, &OrganizationMapping> = mappings
        .iter()
        .filter(|m| m.organization_id == organization_id)
        .map(|m| (m.requirement_id, m))
        .collect();
    let mut changes = CacheChanges::default();

    for requirement in requirements {
        let auto_match = rules
            .get(&requirement.id)
            .is_some_and(|rule| rule.auto_matches(attributes));
        changes.consider(
            requirement.id,
            organization_id,
            auto_match,
            rows.get(&requirement.id).copied(),
            at,
        );
    }

    let in_catalog: HashSet<RequirementId> = requirements.iter().map(|r| r.id).collect();
    for (requirement_id, row) in &rows {
        if !in_catalog.contains(requirement_id) {
            changes.consider(*requirement_id, organization_id, false, Some(row), at);
        }
    }

    changes.into_ordered()
}

/// Plan cache changes for one requirement across every organization.
///
/// Organizations without an attributes record are evaluated against the
/// conservative default attributes.
pub fn plan_for_requirement(
    requirement_id: RequirementId,
    rule: Option<&ApplicabilityRule>,
    organizations: &[Organization],
    attributes: &HashMap<OrganizationId, OrganizationAttributes>,
    mappings: &[OrganizationMapping],
    at: DateTime<Utc>,
) -> CacheChanges {
    let rows: HashMap<OrganizationId, &OrganizationMapping> = mappings
        .iter()
        .filter(|m| m.requirement_id == requirement_id)
        .map(|m| (m.organization_id, m))
        .collect();
    let unknown = OrganizationAttributes::default();
    let mut changes = CacheChanges::default();

    for organization in organizations {
        let attrs = attributes.get(&organization.id).unwrap_or(&unknown);
        let auto_match = rule.is_some_and(|r| r.auto_matches(attrs));
        changes.consider(
            requirement_id,
            organization.id,
            auto_match,
            rows.get(&organization.id).copied(),
            at,
        );
    }

    let known: HashSet<OrganizationId> = organizations.iter().map(|o| o.id).collect();
    for (organization_id, row) in &rows {
        if !known.contains(organization_id) {
            changes.consider(requirement_id, *organization_id, false, Some(row), at);
        }
    }

    changes.into_ordered()
}

/// Plan cache changes for a single pair.
pub fn plan_for_pair(
    requirement_id: RequirementId,
    organization_id: OrganizationId,
    auto_match: bool,
    row: Option<&OrganizationMapping>,
    at: DateTime<Utc>,
) -> CacheChanges {
    let mut changes = CacheChanges::default();
    changes.consider(requirement_id, organization_id, auto_match, row, at);
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqmap_core::{Actor, Criticality, Reason, RuleKind};

    fn requirement() -> Requirement {
        Requirement {
            id: RequirementId::new(),
            code: "R".into(),
            title: "t".into(),
            framework: "F".into(),
            criticality: Criticality::Medium,
            category: None,
        }
    }

    fn match_all_rule(requirement_id: RequirementId) -> ApplicabilityRule {
        let draft = crate::rule::RuleDraft {
            kind: RuleKind::Automatic,
            filter: None,
        };
        ApplicabilityRule::from_draft(requirement_id, &draft, Actor::system(), Utc::now()).unwrap()
    }

    #[test]
    fn positive_match_without_row_is_cached() {
        let org = OrganizationId::new();
        let req = requirement();
        let rules = HashMap::from([(req.id, match_all_rule(req.id))]);
        let plan = plan_for_organization(
            org,
            &OrganizationAttributes::default(),
            &[req.clone()],
            &rules,
            &[],
            Utc::now(),
        );
        assert_eq!(plan.insert.len(), 1);
        assert_eq!(plan.insert[0].mapping_type, MappingType::Automatic);
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn stale_automatic_row_is_removed_and_manual_rows_kept() {
        let org = OrganizationId::new();
        let stale = requirement();
        let manual = requirement();
        let rows = vec![
            OrganizationMapping::automatic(stale.id, org, Utc::now()),
            OrganizationMapping::manual(
                manual.id,
                org,
                MappingType::ManualInclude,
                Reason::new("voluntary adoption").unwrap(),
                Actor::system(),
                Utc::now(),
            )
            .unwrap(),
        ];
        let plan = plan_for_organization(
            org,
            &OrganizationAttributes::default(),
            &[stale.clone(), manual],
            &HashMap::new(),
            &rows,
            Utc::now(),
        );
        assert_eq!(plan.remove, vec![(stale.id, org)]);
        assert!(plan.insert.is_empty());
    }

    #[test]
    fn rows_for_removed_requirements_are_stale() {
        let org = OrganizationId::new();
        let gone = RequirementId::new();
        let rows = vec![OrganizationMapping::automatic(gone, org, Utc::now())];
        let plan = plan_for_organization(
            org,
            &OrganizationAttributes::default(),
            &[],
            &HashMap::new(),
            &rows,
            Utc::now(),
        );
        assert_eq!(plan.remove, vec![(gone, org)]);
    }

    #[test]
    fn requirement_plan_covers_every_organization() {
        let req = RequirementId::new();
        let rule = match_all_rule(req);
        let orgs = vec![
            Organization {
                id: OrganizationId::new(),
                name: "a".into(),
            },
            Organization {
                id: OrganizationId::new(),
                name: "b".into(),
            },
        ];
        let cached = vec![OrganizationMapping::automatic(req, orgs[0].id, Utc::now())];
        let plan = plan_for_requirement(req, Some(&rule), &orgs, &HashMap::new(), &cached, Utc::now());
        assert_eq!(plan.insert.len(), 1);
        assert_eq!(plan.insert[0].organization_id, orgs[1].id);

        let plan = plan_for_requirement(req, None, &orgs, &HashMap::new(), &cached, Utc::now());
        assert_eq!(plan.remove, vec![(req, orgs[0].id)]);
    }

    #[test]
    fn plans_are_ordered_by_pair() {
        let req = RequirementId::new();
        let orgs: Vec<Organization> = (0..16)
            .map(|i| Organization {
                id: OrganizationId::new(),
                name: format!("org-{i}"),
            })
            .collect();
        // Every known organization gets an insert; unknown ones hold stale rows.
        let stale: Vec<OrganizationMapping> = (0..16)
            .map(|_| OrganizationMapping::automatic(req, OrganizationId::new(), Utc::now()))
            .collect();
        let rule = match_all_rule(req);
        let plan = plan_for_requirement(req, Some(&rule), &orgs, &HashMap::new(), &stale, Utc::now());
        assert_eq!(plan.insert.len(), 16);
        assert_eq!(plan.remove.len(), 16);
        assert!(plan
            .insert
            .windows(2)
            .all(|w| w[0].organization_id < w[1].organization_id));
        assert!(plan.remove.windows(2).all(|w| w[0] < w[1]));

        let org = OrganizationId::new();
        let gone: Vec<OrganizationMapping> = (0..16)
            .map(|_| OrganizationMapping::automatic(RequirementId::new(), org, Utc::now()))
            .collect();
        let plan = plan_for_organization(
            org,
            &OrganizationAttributes::default(),
            &[],
            &HashMap::new(),
            &gone,
            Utc::now(),
        );
        assert_eq!(plan.remove.len(), 16);
        assert!(plan.remove.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn pair_plan_is_noop_when_in_sync() {
        let req = RequirementId::new();
        let org = OrganizationId::new();
        let row = OrganizationMapping::automatic(req, org, Utc::now());
        assert!(plan_for_pair(req, org, true, Some(&row), Utc::now()).is_empty());
        assert!(plan_for_pair(req, org, false, None, Utc::now()).is_empty());
    }
}
