//! # Organization Attribute Model
//!
//! Canonical organization attributes used as inputs to automatic
//! applicability matching. Attributes are never inferred; they change only
//! through an explicit update that stamps who changed them and when
//! ([`AttributesRecord`]).
//!
//! ## Ordinal Semantics
//!
//! Both ordinals rank severity with **1 as the most severe**:
//!
//! ```text
//! InfrastructureCategory:  1 (most severe) < 2 < 3
//! DataProtectionLevel:     1 (most stringent) < 2 < 3 < 4
//! ```
//!
//! An absent ordinal (`None`) means "not applicable" and never satisfies a
//! numeric comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{Actor, OrganizationId};

/// Shared behaviour of severity-ranked ordinals.
pub trait SeverityRank: Copy {
    /// Field name used in filters and error messages.
    const FIELD: &'static str;

    /// Human-readable list of accepted ranks.
    const EXPECTED: &'static str;

    /// Numeric rank, 1 being the most severe.
    fn rank(self) -> u8;

    /// Parse a rank, rejecting values outside the enumerated set.
    fn from_rank(rank: u8) -> Result<Self, ValidationError>;

    /// `self` is at least as severe as `rank` (numerically `<=`).
    fn at_least_as_severe_as(self, rank: u8) -> bool {
        self.rank() <= rank
    }

    /// `self` is at most as severe as `rank` (numerically `>=`).
    fn at_most_as_severe_as(self, rank: u8) -> bool {
        self.rank() >= rank
    }
}

/// Critical-infrastructure category of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InfrastructureCategory {
    /// Category 1 — most severe.
    First,
    /// Category 2.
    Second,
    /// Category 3 — least severe.
    Third,
}

impl SeverityRank for InfrastructureCategory {
    const FIELD: &'static str = "kii_category";
    const EXPECTED: &'static str = "1, 2, 3";

    fn rank(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
        }
    }

    fn from_rank(rank: u8) -> Result<Self, ValidationError> {
        match rank {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            3 => Ok(Self::Third),
            other => Err(invalid_rank::<Self>(other)),
        }
    }
}

/// Personal-data protection level of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataProtectionLevel {
    /// Level 1 — most stringent.
    First,
    /// Level 2.
    Second,
    /// Level 3.
    Third,
    /// Level 4 — least stringent.
    Fourth,
}

impl SeverityRank for DataProtectionLevel {
    const FIELD: &'static str = "pdn_level";
    const EXPECTED: &'static str = "1, 2, 3, 4";

    fn rank(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
            Self::Fourth => 4,
        }
    }

    fn from_rank(rank: u8) -> Result<Self, ValidationError> {
        match rank {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            3 => Ok(Self::Third),
            4 => Ok(Self::Fourth),
            other => Err(invalid_rank::<Self>(other)),
        }
    }
}

fn invalid_rank<T: SeverityRank>(value: u8) -> ValidationError {
    ValidationError::InvalidRank {
        field: T::FIELD.to_string(),
        value: value.to_string(),
        expected: T::EXPECTED,
    }
}

impl TryFrom<u8> for InfrastructureCategory {
    type Error = ValidationError;

    fn try_from(rank: u8) -> Result<Self, Self::Error> {
        Self::from_rank(rank)
    }
}

impl From<InfrastructureCategory> for u8 {
    fn from(value: InfrastructureCategory) -> Self {
        value.rank()
    }
}

impl TryFrom<u8> for DataProtectionLevel {
    type Error = ValidationError;

    fn try_from(rank: u8) -> Result<Self, Self::Error> {
        Self::from_rank(rank)
    }
}

impl From<DataProtectionLevel> for u8 {
    fn from(value: DataProtectionLevel) -> Self {
        value.rank()
    }
}

/// Attributes of one organization that automatic rules match against.
///
/// `Default` is the conservative "nothing known" value used when an
/// organization has no attributes record: every ordinal absent, every flag
/// false, employee count unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrganizationAttributes {
    /// Critical-infrastructure category, `None` when not applicable.
    pub kii_category: Option<InfrastructureCategory>,
    /// Personal-data protection level, `None` when not applicable.
    pub pdn_level: Option<DataProtectionLevel>,
    /// Financial-sector organization.
    pub is_financial: bool,
    /// Healthcare-sector organization.
    pub is_healthcare: bool,
    /// Government body.
    pub is_government: bool,
    /// Number of employees, `None` when unknown.
    pub employee_count: Option<u32>,
    /// Transfers data across borders.
    pub cross_border_data: bool,
}

/// Stored attributes together with the update stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributesRecord {
    /// The organization these attributes belong to.
    pub organization_id: OrganizationId,
    /// Current attribute values.
    pub attributes: OrganizationAttributes,
    /// Who last changed the attributes.
    pub updated_by: Actor,
    /// When the attributes last changed.
    pub updated_at: DateTime<Utc>,
}

/// An organization known to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Organization identifier.
    pub id: OrganizationId,
    /// Display name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_rank_is_more_severe() {
        assert!(InfrastructureCategory::First.at_least_as_severe_as(2));
        assert!(InfrastructureCategory::Second.at_least_as_severe_as(2));
        assert!(!InfrastructureCategory::Third.at_least_as_severe_as(2));
        assert!(InfrastructureCategory::Third.at_most_as_severe_as(2));
        assert!(!InfrastructureCategory::First.at_most_as_severe_as(2));
    }

    #[test]
    fn ordinal_serializes_as_rank() {
        let json = serde_json::to_string(&DataProtectionLevel::Third).unwrap();
        assert_eq!(json, "3");
    }

    #[test]
    fn out_of_range_rank_rejected_on_deserialize() {
        assert!(serde_json::from_str::<InfrastructureCategory>("4").is_err());
        assert!(serde_json::from_str::<InfrastructureCategory>("0").is_err());
        assert!(serde_json::from_str::<DataProtectionLevel>("5").is_err());
        assert!(serde_json::from_str::<DataProtectionLevel>("4").is_ok());
    }

    #[test]
    fn from_rank_reports_field() {
        let err = DataProtectionLevel::from_rank(9).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidRank {
                field: "pdn_level".into(),
                value: "9".into(),
                expected: "1, 2, 3, 4",
            }
        );
    }

    #[test]
    fn attributes_default_is_conservative() {
        let attrs = OrganizationAttributes::default();
        assert!(attrs.kii_category.is_none());
        assert!(attrs.pdn_level.is_none());
        assert!(!attrs.is_financial);
        assert!(attrs.employee_count.is_none());
    }

    #[test]
    fn attributes_deserialize_with_missing_fields() {
        let attrs: OrganizationAttributes =
            serde_json::from_str(r#"{"kii_category": 2, "is_financial": true}"#).unwrap();
        assert_eq!(attrs.kii_category, Some(InfrastructureCategory::Second));
        assert!(attrs.is_financial);
        assert!(!attrs.cross_border_data);
    }

    #[test]
    fn attributes_reject_unknown_fields_and_negative_counts() {
        assert!(serde_json::from_str::<OrganizationAttributes>(r#"{"headcount": 3}"#).is_err());
        assert!(
            serde_json::from_str::<OrganizationAttributes>(r#"{"employee_count": -1}"#).is_err()
        );
    }
}
