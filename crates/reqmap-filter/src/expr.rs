//! # Filter Tree
//!
//! The closed set of node kinds an automatic rule filter is built from.
//! Every node is validated at construction (see [`crate::parse`]), so
//! [`FilterExpr::matches`] is a total, exhaustive match with no error path.
//!
//! ## Unknown Data
//!
//! Missing attribute data never proves applicability. An absent ordinal
//! fails every ordinal comparison and an unknown employee count fails every
//! numeric comparison. Boolean flags default to `false`.

use reqmap_core::{OrganizationAttributes, SeverityRank};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// A validated filter expression over organization attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    /// Every child must match. Empty matches everything.
    AllOf(Vec<FilterExpr>),
    /// At least one child must match. Never empty when parsed.
    AnyOf(Vec<FilterExpr>),
    /// A single field comparison.
    Leaf(Predicate),
}

/// A comparison on one attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Compare a severity ordinal against a valid rank for that field.
    Ordinal {
        /// Ordinal attribute.
        field: OrdinalField,
        /// Comparison.
        op: OrdinalOp,
        /// Rank to compare against (1 is most severe).
        rank: u8,
    },
    /// Require a boolean flag to have a given value.
    Flag {
        /// Boolean attribute.
        field: FlagField,
        /// Required value (`is_true` / `is_false`).
        expected: bool,
    },
    /// Numeric constraint on the employee count.
    EmployeeCount(CountOp),
}

/// Severity-ranked attribute fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrdinalField {
    /// Critical-infrastructure category (ranks 1..=3).
    KiiCategory,
    /// Personal-data protection level (ranks 1..=4).
    PdnLevel,
}

impl OrdinalField {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KiiCategory => "kii_category",
            Self::PdnLevel => "pdn_level",
        }
    }
}

/// Ordinal comparisons. Lower rank means more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrdinalOp {
    /// Exactly the given rank.
    Equals,
    /// Rank numerically `<=` the given rank.
    AtLeastAsSevereAs,
    /// Rank numerically `>=` the given rank.
    AtMostAsSevereAs,
}

impl OrdinalOp {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::AtLeastAsSevereAs => "at_least_as_severe_as",
            Self::AtMostAsSevereAs => "at_most_as_severe_as",
        }
    }

    fn apply<T: SeverityRank>(self, value: Option<T>, rank: u8) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Equals => value.rank() == rank,
            Self::AtLeastAsSevereAs => value.at_least_as_severe_as(rank),
            Self::AtMostAsSevereAs => value.at_most_as_severe_as(rank),
        }
    }
}

/// Boolean attribute fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagField {
    /// Financial-sector flag.
    IsFinancial,
    /// Healthcare-sector flag.
    IsHealthcare,
    /// Government-body flag.
    IsGovernment,
    /// Cross-border data transfer flag.
    CrossBorderData,
}

impl FlagField {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsFinancial => "is_financial",
            Self::IsHealthcare => "is_healthcare",
            Self::IsGovernment => "is_government",
            Self::CrossBorderData => "cross_border_data",
        }
    }

    fn read(self, attributes: &OrganizationAttributes) -> bool {
        match self {
            Self::IsFinancial => attributes.is_financial,
            Self::IsHealthcare => attributes.is_healthcare,
            Self::IsGovernment => attributes.is_government,
            Self::CrossBorderData => attributes.cross_border_data,
        }
    }
}

/// Employee-count constraints. Bounds of `Between` are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountOp {
    /// Strictly greater than the value.
    GreaterThan(u64),
    /// Strictly less than the value.
    LessThan(u64),
    /// Within `[min, max]`, with `min <= max`.
    Between {
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },
}

impl CountOp {
    /// Canonical wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GreaterThan(_) => "greater_than",
            Self::LessThan(_) => "less_than",
            Self::Between { .. } => "between",
        }
    }

    fn apply(self, count: Option<u32>) -> bool {
        let Some(count) = count.map(u64::from) else {
            return false;
        };
        match self {
            Self::GreaterThan(n) => count > n,
            Self::LessThan(n) => count < n,
            Self::Between { min, max } => (min..=max).contains(&count),
        }
    }
}

impl Predicate {
    /// Evaluate this comparison against organization attributes.
    pub fn matches(&self, attributes: &OrganizationAttributes) -> bool {
        match *self {
            Self::Ordinal { field, op, rank } => match field {
                OrdinalField::KiiCategory => op.apply(attributes.kii_category, rank),
                OrdinalField::PdnLevel => op.apply(attributes.pdn_level, rank),
            },
            Self::Flag { field, expected } => field.read(attributes) == expected,
            Self::EmployeeCount(op) => op.apply(attributes.employee_count),
        }
    }

    fn to_json(self) -> Value {
        match self {
            Self::Ordinal { field, op, rank } => json!({
                "field": field.as_str(),
                "op": op.as_str(),
                "value": rank,
            }),
            Self::Flag { field, expected } => json!({
                "field": field.as_str(),
                "op": if expected { "is_true" } else { "is_false" },
            }),
            Self::EmployeeCount(op) => {
                let value = match op {
                    CountOp::GreaterThan(n) | CountOp::LessThan(n) => json!(n),
                    CountOp::Between { min, max } => json!({ "min": min, "max": max }),
                };
                json!({
                    "field": "employee_count",
                    "op": op.as_str(),
                    "value": value,
                })
            }
        }
    }
}

impl FilterExpr {
    /// The filter with no constraints.
    pub fn match_all() -> Self {
        Self::AllOf(Vec::new())
    }

    /// Whether this filter has no constraints at all.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::AllOf(children) if children.is_empty())
    }

    /// Evaluate the filter against organization attributes.
    pub fn matches(&self, attributes: &OrganizationAttributes) -> bool {
        match self {
            Self::AllOf(children) => children.iter().all(|c| c.matches(attributes)),
            Self::AnyOf(children) => children.iter().any(|c| c.matches(attributes)),
            Self::Leaf(predicate) => predicate.matches(attributes),
        }
    }

    /// Number of leaf predicates in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::AllOf(children) | Self::AnyOf(children) => {
                children.iter().map(FilterExpr::leaf_count).sum()
            }
            Self::Leaf(_) => 1,
        }
    }

    /// Render the filter in its canonical wire form.
    pub fn to_json(&self) -> Value {
        match self {
            Self::AllOf(children) => {
                json!({ "all_of": children.iter().map(FilterExpr::to_json).collect::<Vec<_>>() })
            }
            Self::AnyOf(children) => {
                json!({ "any_of": children.iter().map(FilterExpr::to_json).collect::<Vec<_>>() })
            }
            Self::Leaf(predicate) => predicate.to_json(),
        }
    }
}

impl Serialize for FilterExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqmap_core::{DataProtectionLevel, InfrastructureCategory};

    fn kii(op: OrdinalOp, rank: u8) -> FilterExpr {
        FilterExpr::Leaf(Predicate::Ordinal {
            field: OrdinalField::KiiCategory,
            op,
            rank,
        })
    }

    fn attrs_with_kii(category: Option<InfrastructureCategory>) -> OrganizationAttributes {
        OrganizationAttributes {
            kii_category: category,
            ..Default::default()
        }
    }

    #[test]
    fn at_least_as_severe_includes_more_severe_ranks() {
        let f = kii(OrdinalOp::AtLeastAsSevereAs, 2);
        assert!(f.matches(&attrs_with_kii(Some(InfrastructureCategory::First))));
        assert!(f.matches(&attrs_with_kii(Some(InfrastructureCategory::Second))));
        assert!(!f.matches(&attrs_with_kii(Some(InfrastructureCategory::Third))));
    }

    #[test]
    fn at_most_as_severe_includes_less_severe_ranks() {
        let f = kii(OrdinalOp::AtMostAsSevereAs, 2);
        assert!(!f.matches(&attrs_with_kii(Some(InfrastructureCategory::First))));
        assert!(f.matches(&attrs_with_kii(Some(InfrastructureCategory::Second))));
        assert!(f.matches(&attrs_with_kii(Some(InfrastructureCategory::Third))));
    }

    #[test]
    fn absent_ordinal_never_matches() {
        for op in [
            OrdinalOp::Equals,
            OrdinalOp::AtLeastAsSevereAs,
            OrdinalOp::AtMostAsSevereAs,
        ] {
            assert!(!kii(op, 3).matches(&attrs_with_kii(None)));
        }
    }

    #[test]
    fn pdn_equals() {
        let f = FilterExpr::Leaf(Predicate::Ordinal {
            field: OrdinalField::PdnLevel,
            op: OrdinalOp::Equals,
            rank: 4,
        });
        let attrs = OrganizationAttributes {
            pdn_level: Some(DataProtectionLevel::Fourth),
            ..Default::default()
        };
        assert!(f.matches(&attrs));
        assert!(!f.matches(&OrganizationAttributes::default()));
    }

    #[test]
    fn flag_predicates() {
        let is_fin = FilterExpr::Leaf(Predicate::Flag {
            field: FlagField::IsFinancial,
            expected: true,
        });
        let not_gov = FilterExpr::Leaf(Predicate::Flag {
            field: FlagField::IsGovernment,
            expected: false,
        });
        let attrs = OrganizationAttributes {
            is_financial: true,
            ..Default::default()
        };
        assert!(is_fin.matches(&attrs));
        assert!(not_gov.matches(&attrs));
        assert!(!is_fin.matches(&OrganizationAttributes::default()));
    }

    #[test]
    fn employee_count_bounds_are_inclusive_and_unknown_fails() {
        let f = FilterExpr::Leaf(Predicate::EmployeeCount(CountOp::Between { min: 50, max: 250 }));
        let with = |n| OrganizationAttributes {
            employee_count: n,
            ..Default::default()
        };
        assert!(f.matches(&with(Some(50))));
        assert!(f.matches(&with(Some(250))));
        assert!(!f.matches(&with(Some(49))));
        assert!(!f.matches(&with(Some(251))));
        assert!(!f.matches(&with(None)));

        let lt = FilterExpr::Leaf(Predicate::EmployeeCount(CountOp::LessThan(10)));
        assert!(!lt.matches(&with(None)));
        assert!(lt.matches(&with(Some(0))));
    }

    #[test]
    fn combinators() {
        let attrs = OrganizationAttributes {
            kii_category: Some(InfrastructureCategory::Second),
            is_healthcare: true,
            ..Default::default()
        };
        let healthcare = FilterExpr::Leaf(Predicate::Flag {
            field: FlagField::IsHealthcare,
            expected: true,
        });
        let financial = FilterExpr::Leaf(Predicate::Flag {
            field: FlagField::IsFinancial,
            expected: true,
        });
        let severe = kii(OrdinalOp::AtLeastAsSevereAs, 2);

        let any = FilterExpr::AnyOf(vec![financial.clone(), healthcare.clone()]);
        assert!(any.matches(&attrs));
        let all = FilterExpr::AllOf(vec![severe.clone(), financial]);
        assert!(!all.matches(&attrs));
        let nested = FilterExpr::AllOf(vec![severe, any]);
        assert!(nested.matches(&attrs));
        assert_eq!(nested.leaf_count(), 3);
    }

    #[test]
    fn match_all_is_recognised() {
        assert!(FilterExpr::match_all().is_match_all());
        assert!(!kii(OrdinalOp::Equals, 1).is_match_all());
    }

    #[test]
    fn serialize_uses_canonical_wire_form() {
        let f = FilterExpr::AllOf(vec![
            kii(OrdinalOp::AtLeastAsSevereAs, 2),
            FilterExpr::Leaf(Predicate::EmployeeCount(CountOp::Between { min: 1, max: 9 })),
        ]);
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["all_of"][0]["field"], "kii_category");
        assert_eq!(v["all_of"][0]["op"], "at_least_as_severe_as");
        assert_eq!(v["all_of"][0]["value"], 2);
        assert_eq!(v["all_of"][1]["value"]["min"], 1);
        let back: FilterExpr = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }
}
