#![deny(missing_docs)]

//! # reqmap-filter — Filter Predicate Evaluator
//!
//! Two small filter languages used by the applicability engine:
//!
//! - [`FilterExpr`] decides whether an automatic rule matches an
//!   organization. It is a closed tree of `all_of` / `any_of` combinators
//!   over field predicates, validated from JSON when a rule is saved.
//!   Evaluation is an exhaustive match and never fails.
//!
//! - [`RequirementFilter`] selects requirements from the catalog by their
//!   static properties (framework, criticality, category) for bulk
//!   inclusion.
//!
//! ## Wire Format
//!
//! ```json
//! {
//!   "all_of": [
//!     { "field": "kii_category", "op": "at_least_as_severe_as", "value": 2 },
//!     { "any_of": [
//!         { "field": "is_financial", "op": "is_true" },
//!         { "field": "employee_count", "op": "between", "value": { "min": 50, "max": 250 } }
//!     ] }
//!   ]
//! }
//! ```
//!
//! `null`, `{}` and `{"all_of": []}` all mean "no constraints" and match
//! every organization, including one with no attributes record.

pub mod expr;
pub mod parse;
pub mod requirement;

pub use expr::{CountOp, FilterExpr, FlagField, OrdinalField, OrdinalOp, Predicate};
pub use parse::MAX_DEPTH;
pub use requirement::RequirementFilter;

use reqmap_core::OrganizationAttributes;

/// Evaluate an optional rule filter against organization attributes.
///
/// An absent filter is treated identically to an empty one and matches.
pub fn evaluate(filter: Option<&FilterExpr>, attributes: &OrganizationAttributes) -> bool {
    filter.map_or(true, |f| f.matches(attributes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_filter_matches_empty_attributes() {
        assert!(evaluate(None, &OrganizationAttributes::default()));
    }

    #[test]
    fn empty_filter_matches_empty_attributes() {
        let f = FilterExpr::parse(&serde_json::json!({})).unwrap();
        assert!(evaluate(Some(&f), &OrganizationAttributes::default()));
    }
}
