//! # Requirement Catalog Records
//!
//! The requirement catalog is owned by a neighbouring subsystem. The engine
//! only needs each requirement's identity and the static properties that
//! bulk inclusion filters on.

use serde::{Deserialize, Serialize};

use crate::identity::RequirementId;

/// Criticality level of a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Low criticality.
    Low,
    /// Medium criticality.
    Medium,
    /// High criticality.
    High,
    /// Critical requirement.
    Critical,
}

impl Criticality {
    /// Return the string value used in storage and filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requirement from a regulatory framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Catalog identifier.
    pub id: RequirementId,
    /// Short code within the framework (e.g. `"152-FZ 19.3"`).
    pub code: String,
    /// Human-readable title.
    pub title: String,
    /// Framework the requirement belongs to.
    pub framework: String,
    /// Criticality level.
    pub criticality: Criticality,
    /// Optional thematic category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// How a requirement's applicability is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Evaluated against organization attributes with a filter.
    Automatic,
    /// Never applies automatically; only manual inclusion makes it applicable.
    Manual,
}

impl RuleKind {
    /// Return the string value used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criticality_parse_matches_as_str() {
        for c in [
            Criticality::Low,
            Criticality::Medium,
            Criticality::High,
            Criticality::Critical,
        ] {
            assert_eq!(Criticality::parse(c.as_str()), Some(c));
        }
        assert_eq!(Criticality::parse("severe"), None);
    }

    #[test]
    fn rule_kind_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&RuleKind::Automatic).unwrap(), "\"automatic\"");
        let k: RuleKind = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(k, RuleKind::Manual);
    }

    #[test]
    fn requirement_category_is_optional() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "code": "R1",
            "title": "Appoint a data protection officer",
            "framework": "152-FZ",
            "criticality": "high"
        }"#;
        let req: Requirement = serde_json::from_str(json).unwrap();
        assert!(req.category.is_none());
        assert_eq!(req.criticality, Criticality::High);
    }
}
