//! # Error Hierarchy
//!
//! Structured error types for the applicability engine, built with
//! `thiserror`. No `Box<dyn Error>`, no `.unwrap()` outside tests.
//!
//! Callers present [`ValidationError`] and [`NotFoundError`] as actionable
//! messages. `Conflict` and [`PersistenceError`] are infrastructure failures
//! and are reported as retryable via [`EngineError::is_retryable`].

use thiserror::Error;

/// Top-level error type for every engine operation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Caller supplied malformed input.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced requirement, organization, rule, or mapping does not exist.
    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// A concurrent write violated a uniqueness invariant that the upsert
    /// could not resolve.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The underlying store is unavailable or failed mid-operation.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Persistence(_))
    }

    /// Shorthand for a [`NotFoundError`] wrapped in [`EngineError::NotFound`].
    pub fn not_found(kind: ResourceKind, id: impl ToString) -> Self {
        Self::NotFound(NotFoundError {
            kind,
            id: id.to_string(),
        })
    }
}

/// Validation errors for filters, attributes, and manual decisions.
///
/// Each variant carries the offending input so an operator can fix a rule
/// or request without guesswork.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The filter references an attribute field that does not exist.
    #[error("unknown filter field \"{0}\"")]
    UnknownField(String),

    /// The operator is not defined for the field's type.
    #[error("unknown operator \"{op}\" for field \"{field}\"")]
    UnknownOperator {
        /// Field the operator was applied to.
        field: String,
        /// The rejected operator.
        op: String,
    },

    /// An ordinal comparison used a rank outside the enumerated set.
    #[error("invalid rank {value} for \"{field}\" (expected one of {expected})")]
    InvalidRank {
        /// Ordinal field name.
        field: String,
        /// The rejected value, as written.
        value: String,
        /// Human-readable list of accepted ranks.
        expected: &'static str,
    },

    /// The operator requires a value and none was supplied.
    #[error("operator \"{op}\" on \"{field}\" requires a value")]
    MissingValue {
        /// Field name.
        field: String,
        /// Operator name.
        op: String,
    },

    /// The supplied value has the wrong shape for the operator.
    #[error("invalid value for \"{field}\" {op}: {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Operator name.
        op: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// `between` bounds were given in the wrong order.
    #[error("between bounds are inverted: min {min} > max {max}")]
    InvertedBounds {
        /// Lower bound as supplied.
        min: u64,
        /// Upper bound as supplied.
        max: u64,
    },

    /// `any_of` with no alternatives can never match.
    #[error("any_of requires at least one condition")]
    EmptyAnyOf,

    /// The filter JSON does not have a recognised node shape.
    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    /// A manual mapping was requested without a reason.
    #[error("a non-empty reason is required for a manual include or exclude")]
    MissingReason,

    /// The reason exceeds the storage limit.
    #[error("reason exceeds {max} characters (got {actual})")]
    ReasonTooLong {
        /// Maximum accepted length.
        max: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Actor identifier is empty.
    #[error("actor must be non-empty")]
    EmptyActor,

    /// Actor identifier exceeds the storage limit.
    #[error("actor exceeds {max} characters (got {actual})")]
    ActorTooLong {
        /// Maximum accepted length.
        max: usize,
        /// Supplied length.
        actual: usize,
    },

    /// A bulk requirement filter named no criterion at all.
    #[error("requirement filter must name at least one of framework, criticality, category")]
    EmptyRequirementFilter,

    /// Organization attributes failed validation.
    #[error("invalid organization attributes: {0}")]
    InvalidAttributes(String),

    /// A stored mapping row is internally inconsistent.
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
}

/// The kind of record a [`NotFoundError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A requirement in the catalog.
    Requirement,
    /// An organization.
    Organization,
    /// An applicability rule.
    Rule,
    /// An organization mapping.
    Mapping,
}

impl ResourceKind {
    /// Return the lowercase name used in messages and error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Organization => "organization",
            Self::Rule => "rule",
            Self::Mapping => "mapping",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A referenced record does not exist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} {id} does not exist")]
pub struct NotFoundError {
    /// What kind of record was looked up.
    pub kind: ResourceKind,
    /// The identifier that was not found.
    pub id: String,
}

/// The store failed. Never converted into an empty result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct PersistenceError {
    /// The store operation that failed (e.g. `"list_mappings"`).
    pub operation: &'static str,
    /// Driver or transport message.
    pub message: String,
}

impl PersistenceError {
    /// Build a persistence error for the named store operation.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}
