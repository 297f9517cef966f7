//! # Requirement Filter
//!
//! Selects requirements from the catalog by their static properties for
//! bulk inclusion. Unlike [`crate::FilterExpr`] this filters requirements,
//! not organizations. Criteria are conjunctive; string criteria compare
//! case-insensitively after trimming.

use reqmap_core::{Criticality, Requirement, ValidationError};
use serde::{Deserialize, Serialize};

/// Conjunction of requirement property criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementFilter {
    /// Framework the requirement belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Exact criticality level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    /// Thematic category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RequirementFilter {
    /// Reject a filter that names no criterion, or names a blank one.
    ///
    /// A filter with no criteria would select the whole catalog.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [("framework", &self.framework), ("category", &self.category)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::InvalidValue {
                    field: name.to_string(),
                    op: "equals".to_string(),
                    reason: "must not be blank".to_string(),
                });
            }
        }
        if self.framework.is_none() && self.criticality.is_none() && self.category.is_none() {
            return Err(ValidationError::EmptyRequirementFilter);
        }
        Ok(())
    }

    /// Whether `requirement` satisfies every criterion.
    pub fn matches(&self, requirement: &Requirement) -> bool {
        let framework_ok = self
            .framework
            .as_deref()
            .map_or(true, |f| same_text(f, &requirement.framework));
        let criticality_ok = self
            .criticality
            .map_or(true, |c| c == requirement.criticality);
        let category_ok = self.category.as_deref().map_or(true, |c| {
            requirement
                .category
                .as_deref()
                .is_some_and(|rc| same_text(c, rc))
        });
        framework_ok && criticality_ok && category_ok
    }

    /// The requirements in `catalog` that satisfy the filter.
    pub fn select<'a>(&self, catalog: &'a [Requirement]) -> Vec<&'a Requirement> {
        catalog.iter().filter(|r| self.matches(r)).collect()
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqmap_core::RequirementId;

    fn req(framework: &str, criticality: Criticality, category: Option<&str>) -> Requirement {
        Requirement {
            id: RequirementId::new(),
            code: "X".into(),
            title: "t".into(),
            framework: framework.into(),
            criticality,
            category: category.map(String::from),
        }
    }

    #[test]
    fn empty_filter_rejected() {
        assert_eq!(
            RequirementFilter::default().validate(),
            Err(ValidationError::EmptyRequirementFilter)
        );
    }

    #[test]
    fn blank_criterion_rejected() {
        let f = RequirementFilter {
            framework: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(f.validate(), Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn criticality_only() {
        let f = RequirementFilter {
            criticality: Some(Criticality::Critical),
            ..Default::default()
        };
        assert!(f.validate().is_ok());
        assert!(f.matches(&req("152-FZ", Criticality::Critical, None)));
        assert!(!f.matches(&req("152-FZ", Criticality::High, None)));
    }

    #[test]
    fn criteria_are_conjunctive_and_case_insensitive() {
        let f = RequirementFilter {
            framework: Some("187-fz".into()),
            criticality: None,
            category: Some("Access Control".into()),
        };
        assert!(f.matches(&req("187-FZ", Criticality::Low, Some("access control"))));
        assert!(!f.matches(&req("187-FZ", Criticality::Low, None)));
        assert!(!f.matches(&req("152-FZ", Criticality::Low, Some("access control"))));
    }

    #[test]
    fn select_filters_catalog() {
        let catalog = vec![
            req("A", Criticality::Critical, None),
            req("A", Criticality::Low, None),
            req("B", Criticality::Critical, None),
        ];
        let f = RequirementFilter {
            criticality: Some(Criticality::Critical),
            ..Default::default()
        };
        assert_eq!(f.select(&catalog).len(), 2);
    }

    #[test]
    fn unknown_keys_rejected_on_deserialize() {
        assert!(serde_json::from_str::<RequirementFilter>(r#"{"severity": "high"}"#).is_err());
        let f: RequirementFilter = serde_json::from_str(r#"{"criticality": "critical"}"#).unwrap();
        assert_eq!(f.criticality, Some(Criticality::Critical));
    }
}
