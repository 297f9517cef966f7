//! # Identity Newtypes
//!
//! Domain-primitive newtypes for identifiers and free-text values used by
//! the engine. Each identifier is a distinct type — you cannot pass a
//! [`RequirementId`] where an [`OrganizationId`] is expected.
//!
//! ## Validation
//!
//! UUID-based identifiers are always valid by construction and totally
//! ordered, so resolver output can be sorted by id. String-based values
//! ([`Reason`], [`Actor`]) are trimmed and validated at construction and
//! at deserialization time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Upper bound on a stored reason, in characters.
pub const MAX_REASON_LEN: usize = 2000;

/// Upper bound on an actor identifier, in characters.
pub const MAX_ACTOR_LEN: usize = 255;

/// Defines a UUID-backed identifier newtype with the standard constructors.
macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Helper macro to implement `Deserialize` for string newtypes that must
/// validate their contents. Deserializes as a plain `String`, then routes
/// through the type's `new()` constructor so that invalid values are
/// rejected at deserialization time.
macro_rules! impl_validating_deserialize {
    ($ty:ident) => {
        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::new(raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// UUID-based identifiers
// ---------------------------------------------------------------------------

uuid_identifier!(
    /// Identifier of a requirement in the catalog.
    RequirementId
);

uuid_identifier!(
    /// Identifier of an organization whose applicable requirements are resolved.
    OrganizationId
);

uuid_identifier!(
    /// Identifier of a stored organization mapping row.
    MappingId
);

uuid_identifier!(
    /// Shared identifier stamped on every mapping written by one bulk call.
    BatchId
);

uuid_identifier!(
    /// Identifier of an entry in the applicability audit log.
    AuditEventId
);

// ---------------------------------------------------------------------------
// String-based values
// ---------------------------------------------------------------------------

/// Free-text justification recorded with a manual include or exclude.
///
/// Trimmed, non-empty, at most [`MAX_REASON_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Reason(String);

impl Reason {
    /// Create a reason, rejecting blank or oversized input.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MissingReason`] for blank input,
    /// [`ValidationError::ReasonTooLong`] above the length limit.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingReason);
        }
        let len = trimmed.chars().count();
        if len > MAX_REASON_LEN {
            return Err(ValidationError::ReasonTooLong {
                max: MAX_REASON_LEN,
                actual: len,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Build a reason from an optional input, treating `None` as missing.
    pub fn required(value: Option<&str>) -> Result<Self, ValidationError> {
        value
            .map(Self::new)
            .unwrap_or(Err(ValidationError::MissingReason))
    }

    /// Access the reason text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl_validating_deserialize!(Reason);

/// The user or process that made a decision.
///
/// Authentication is the caller's concern; the engine only records who
/// the calling context says acted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    /// Actor recorded on automatic cache rows written by reconciliation.
    pub const SYSTEM: &'static str = "system:reconciler";

    /// Create an actor identifier.
    ///
    /// # Errors
    ///
    /// [`ValidationError::EmptyActor`] for blank input,
    /// [`ValidationError::ActorTooLong`] above the length limit.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyActor);
        }
        let len = trimmed.chars().count();
        if len > MAX_ACTOR_LEN {
            return Err(ValidationError::ActorTooLong {
                max: MAX_ACTOR_LEN,
                actual: len,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The reconciler's own identity.
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    /// Access the actor string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl_validating_deserialize!(Actor);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_ids_are_distinct_and_ordered() {
        let a = RequirementId::from_uuid(Uuid::from_u128(1));
        let b = RequirementId::from_uuid(Uuid::from_u128(2));
        assert!(a < b);
        assert_ne!(RequirementId::new(), RequirementId::new());
    }

    #[test]
    fn identifier_serializes_as_plain_uuid() {
        let id = OrganizationId::from_uuid(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000007\"");
    }

    #[test]
    fn reason_is_trimmed() {
        let r = Reason::new("  pilot programme exemption  ").unwrap();
        assert_eq!(r.as_str(), "pilot programme exemption");
    }

    #[test]
    fn blank_reason_rejected() {
        assert_eq!(Reason::new("   "), Err(ValidationError::MissingReason));
        assert_eq!(Reason::required(None), Err(ValidationError::MissingReason));
    }

    #[test]
    fn oversized_reason_rejected() {
        let long = "x".repeat(MAX_REASON_LEN + 1);
        assert!(matches!(
            Reason::new(long),
            Err(ValidationError::ReasonTooLong { .. })
        ));
    }

    #[test]
    fn reason_deserialization_validates() {
        assert!(serde_json::from_str::<Reason>("\"\"").is_err());
        let r: Reason = serde_json::from_str("\"voluntary adoption\"").unwrap();
        assert_eq!(r.as_str(), "voluntary adoption");
    }

    #[test]
    fn actor_rejects_blank() {
        assert_eq!(Actor::new(""), Err(ValidationError::EmptyActor));
        assert!(serde_json::from_str::<Actor>("\"  \"").is_err());
    }

    #[test]
    fn system_actor_is_stable() {
        assert_eq!(Actor::system().as_str(), Actor::SYSTEM);
    }
}
