//! # Applicability Rules
//!
//! At most one rule exists per requirement. An `automatic` rule carries a
//! validated [`FilterExpr`]; a `manual` rule carries none and never
//! auto-applies.

use chrono::{DateTime, Utc};
use reqmap_core::{Actor, OrganizationAttributes, RequirementId, RuleKind, ValidationError};
use reqmap_filter::FilterExpr;
use serde::{Deserialize, Serialize};

/// The stored rule for one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicabilityRule {
    /// Requirement the rule belongs to. Unique.
    pub requirement_id: RequirementId,
    /// Automatic or manual.
    pub kind: RuleKind,
    /// Validated filter; `None` for manual rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    /// Who first created the rule.
    pub created_by: Actor,
    /// Who last replaced the rule.
    pub updated_by: Actor,
    /// When the rule was first created.
    pub created_at: DateTime<Utc>,
    /// When the rule was last replaced.
    pub updated_at: DateTime<Utc>,
}

impl ApplicabilityRule {
    /// Build a rule from a validated draft.
    pub fn from_draft(
        requirement_id: RequirementId,
        draft: &RuleDraft,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let filter = match draft.kind {
            RuleKind::Automatic => Some(FilterExpr::parse_optional(draft.filter.as_ref())?),
            RuleKind::Manual => None,
        };
        Ok(Self {
            requirement_id,
            kind: draft.kind,
            filter,
            created_by: actor.clone(),
            updated_by: actor,
            created_at: at,
            updated_at: at,
        })
    }

    /// Fresh automatic decision for the given attributes.
    ///
    /// Manual rules never match. An automatic rule without a filter matches
    /// everything.
    pub fn auto_matches(&self, attributes: &OrganizationAttributes) -> bool {
        match self.kind {
            RuleKind::Automatic => reqmap_filter::evaluate(self.filter.as_ref(), attributes),
            RuleKind::Manual => false,
        }
    }

    /// Carry the creation stamp of the rule being replaced.
    pub fn replacing(self, existing: &ApplicabilityRule) -> Self {
        Self {
            created_by: existing.created_by.clone(),
            created_at: existing.created_at,
            ..self
        }
    }
}

/// Unvalidated rule as submitted by a rule author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    /// Automatic or manual.
    pub kind: RuleKind,
    /// Raw filter JSON; ignored for manual rules.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqmap_core::InfrastructureCategory;
    use serde_json::json;

    fn actor() -> Actor {
        Actor::new("rules@example.org").unwrap()
    }

    #[test]
    fn automatic_without_filter_matches_everything() {
        let draft = RuleDraft {
            kind: RuleKind::Automatic,
            filter: None,
        };
        let rule = ApplicabilityRule::from_draft(RequirementId::new(), &draft, actor(), Utc::now()).unwrap();
        assert!(rule.filter.as_ref().is_some_and(FilterExpr::is_match_all));
        assert!(rule.auto_matches(&OrganizationAttributes::default()));
    }

    #[test]
    fn manual_rule_discards_filter_and_never_matches() {
        let draft = RuleDraft {
            kind: RuleKind::Manual,
            filter: Some(json!({"field": "is_financial", "op": "is_true"})),
        };
        let rule = ApplicabilityRule::from_draft(RequirementId::new(), &draft, actor(), Utc::now()).unwrap();
        assert!(rule.filter.is_none());
        let attrs = OrganizationAttributes {
            is_financial: true,
            ..Default::default()
        };
        assert!(!rule.auto_matches(&attrs));
    }

    #[test]
    fn malformed_filter_fails_at_save_time() {
        let draft = RuleDraft {
            kind: RuleKind::Automatic,
            filter: Some(json!({"field": "kii_category", "op": "equals", "value": 7})),
        };
        assert!(matches!(
            ApplicabilityRule::from_draft(RequirementId::new(), &draft, actor(), Utc::now()),
            Err(ValidationError::InvalidRank { .. })
        ));
    }

    #[test]
    fn automatic_rule_evaluates_filter() {
        let draft = RuleDraft {
            kind: RuleKind::Automatic,
            filter: Some(json!({"field": "kii_category", "op": "at_least_as_severe_as", "value": 2})),
        };
        let rule = ApplicabilityRule::from_draft(RequirementId::new(), &draft, actor(), Utc::now()).unwrap();
        let attrs = OrganizationAttributes {
            kii_category: Some(InfrastructureCategory::Second),
            ..Default::default()
        };
        assert!(rule.auto_matches(&attrs));
        assert!(!rule.auto_matches(&OrganizationAttributes::default()));
    }

    #[test]
    fn replacing_keeps_creation_stamp() {
        let draft = RuleDraft {
            kind: RuleKind::Manual,
            filter: None,
        };
        let first = ApplicabilityRule::from_draft(RequirementId::new(), &draft, actor(), Utc::now()).unwrap();
        let other = Actor::new("someone-else").unwrap();
        let second = ApplicabilityRule::from_draft(first.requirement_id, &draft, other.clone(), Utc::now())
            .unwrap()
            .replacing(&first);
        assert_eq!(second.created_by, first.created_by);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.updated_by, other);
    }
}
