//! # Filter Validation
//!
//! Turns rule-author JSON into a [`FilterExpr`]. All validation happens
//! here, at rule-save time, so evaluation never has to reject anything.
//!
//! Field names are accepted in `snake_case` or `camelCase`
//! (`kii_category` / `kiiCategory`). Operators are accepted with `_` or `-`
//! separators (`at_least_as_severe_as` / `at-least-as-severe-as`).

use reqmap_core::{DataProtectionLevel, InfrastructureCategory, SeverityRank, ValidationError};
use serde_json::{Map, Value};

use crate::expr::{CountOp, FilterExpr, FlagField, OrdinalField, OrdinalOp, Predicate};

/// Maximum nesting depth of combinators.
pub const MAX_DEPTH: usize = 32;

/// Field kinds, each with its own operator set.
#[derive(Debug, Clone, Copy)]
enum Field {
    Ordinal(OrdinalField),
    Flag(FlagField),
    EmployeeCount,
}

impl Field {
    fn parse(name: &str) -> Result<Self, ValidationError> {
        let field = match name {
            "kii_category" | "kiiCategory" => Self::Ordinal(OrdinalField::KiiCategory),
            "pdn_level" | "pdnLevel" => Self::Ordinal(OrdinalField::PdnLevel),
            "is_financial" | "isFinancial" => Self::Flag(FlagField::IsFinancial),
            "is_healthcare" | "isHealthcare" => Self::Flag(FlagField::IsHealthcare),
            "is_government" | "isGovernment" => Self::Flag(FlagField::IsGovernment),
            "cross_border_data" | "crossBorderData" => Self::Flag(FlagField::CrossBorderData),
            "employee_count" | "employeeCount" => Self::EmployeeCount,
            other => return Err(ValidationError::UnknownField(other.to_string())),
        };
        Ok(field)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ordinal(f) => f.as_str(),
            Self::Flag(f) => f.as_str(),
            Self::EmployeeCount => "employee_count",
        }
    }
}

impl FilterExpr {
    /// Validate a JSON filter into a [`FilterExpr`].
    ///
    /// `null` and `{}` produce the match-all filter.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the offending field, operator,
    /// or value for any input that is not a well-formed filter.
    pub fn parse(value: &Value) -> Result<Self, ValidationError> {
        parse_node(value, 0)
    }

    /// Validate an optional JSON filter, treating absence as match-all.
    pub fn parse_optional(value: Option<&Value>) -> Result<Self, ValidationError> {
        match value {
            Some(v) => Self::parse(v),
            None => Ok(Self::match_all()),
        }
    }
}

fn parse_node(value: &Value, depth: usize) -> Result<FilterExpr, ValidationError> {
    if depth > MAX_DEPTH {
        return Err(ValidationError::MalformedFilter(format!(
            "nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    match value {
        Value::Null => Ok(FilterExpr::match_all()),
        Value::Object(map) if map.is_empty() => Ok(FilterExpr::match_all()),
        Value::Object(map) => parse_object(map, depth),
        other => Err(ValidationError::MalformedFilter(format!(
            "expected an object, got {}",
            type_name(other)
        ))),
    }
}

fn parse_object(map: &Map<String, Value>, depth: usize) -> Result<FilterExpr, ValidationError> {
    if let Some(children) = combinator(map, &["all_of", "allOf"])? {
        let parsed = parse_children(children, depth)?;
        return Ok(FilterExpr::AllOf(parsed));
    }
    if let Some(children) = combinator(map, &["any_of", "anyOf"])? {
        let parsed = parse_children(children, depth)?;
        if parsed.is_empty() {
            return Err(ValidationError::EmptyAnyOf);
        }
        return Ok(FilterExpr::AnyOf(parsed));
    }
    if map.contains_key("field") {
        return parse_leaf(map).map(FilterExpr::Leaf);
    }
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    Err(ValidationError::MalformedFilter(format!(
        "unrecognised node with keys [{}]",
        keys.join(", ")
    )))
}

/// Extract a combinator's child array if `map` is a combinator node.
fn combinator<'a>(
    map: &'a Map<String, Value>,
    names: &[&str],
) -> Result<Option<&'a Vec<Value>>, ValidationError> {
    let Some((name, value)) = names
        .iter()
        .find_map(|n| map.get(*n).map(|v| (*n, v)))
    else {
        return Ok(None);
    };
    if map.len() != 1 {
        return Err(ValidationError::MalformedFilter(format!(
            "{name} node must not have sibling keys"
        )));
    }
    match value {
        Value::Array(children) => Ok(Some(children)),
        other => Err(ValidationError::MalformedFilter(format!(
            "{name} expects an array, got {}",
            type_name(other)
        ))),
    }
}

fn parse_children(children: &[Value], depth: usize) -> Result<Vec<FilterExpr>, ValidationError> {
    children.iter().map(|c| parse_node(c, depth + 1)).collect()
}

fn parse_leaf(map: &Map<String, Value>) -> Result<Predicate, ValidationError> {
    if let Some(extra) = map
        .keys()
        .find(|k| !matches!(k.as_str(), "field" | "op" | "value"))
    {
        return Err(ValidationError::MalformedFilter(format!(
            "unexpected key \"{extra}\" in field comparison"
        )));
    }
    let field_name = map
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MalformedFilter("\"field\" must be a string".into()))?;
    let field = Field::parse(field_name)?;
    let op = map
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ValidationError::MalformedFilter(format!("comparison on \"{}\" has no \"op\"", field.name()))
        })?
        .replace('-', "_");
    let value = map.get("value").filter(|v| !v.is_null());

    match field {
        Field::Ordinal(ordinal) => parse_ordinal(ordinal, &op, value),
        Field::Flag(flag) => parse_flag(flag, &op, value),
        Field::EmployeeCount => parse_count(&op, value).map(Predicate::EmployeeCount),
    }
}

fn parse_ordinal(
    field: OrdinalField,
    op: &str,
    value: Option<&Value>,
) -> Result<Predicate, ValidationError> {
    let op = match op {
        "equals" | "eq" => OrdinalOp::Equals,
        "at_least_as_severe_as" => OrdinalOp::AtLeastAsSevereAs,
        "at_most_as_severe_as" => OrdinalOp::AtMostAsSevereAs,
        other => return Err(unknown_operator(field.as_str(), other)),
    };
    let value = value.ok_or_else(|| ValidationError::MissingValue {
        field: field.as_str().to_string(),
        op: op.as_str().to_string(),
    })?;
    let rank = match field {
        OrdinalField::KiiCategory => checked_rank::<InfrastructureCategory>(value)?,
        OrdinalField::PdnLevel => checked_rank::<DataProtectionLevel>(value)?,
    };
    Ok(Predicate::Ordinal { field, op, rank })
}

/// Accept only integers that are valid ranks for the ordinal `T`.
fn checked_rank<T: SeverityRank>(value: &Value) -> Result<u8, ValidationError> {
    let invalid = || ValidationError::InvalidRank {
        field: T::FIELD.to_string(),
        value: value.to_string(),
        expected: T::EXPECTED,
    };
    let raw = value.as_u64().ok_or_else(invalid)?;
    let rank = u8::try_from(raw).map_err(|_| invalid())?;
    T::from_rank(rank).map(SeverityRank::rank)
}

fn parse_flag(
    field: FlagField,
    op: &str,
    value: Option<&Value>,
) -> Result<Predicate, ValidationError> {
    let expected = match op {
        "is_true" => true,
        "is_false" => false,
        other => return Err(unknown_operator(field.as_str(), other)),
    };
    if value.is_some() {
        return Err(ValidationError::InvalidValue {
            field: field.as_str().to_string(),
            op: op.to_string(),
            reason: "operator takes no value".to_string(),
        });
    }
    Ok(Predicate::Flag { field, expected })
}

fn parse_count(op: &str, value: Option<&Value>) -> Result<CountOp, ValidationError> {
    const FIELD: &str = "employee_count";
    if !matches!(op, "greater_than" | "less_than" | "between") {
        return Err(unknown_operator(FIELD, op));
    }
    let value = value.ok_or_else(|| ValidationError::MissingValue {
        field: FIELD.to_string(),
        op: op.to_string(),
    })?;
    let invalid = |reason: &str| ValidationError::InvalidValue {
        field: FIELD.to_string(),
        op: op.to_string(),
        reason: reason.to_string(),
    };
    let count = |v: &Value| {
        v.as_u64()
            .ok_or_else(|| invalid("expected a non-negative integer"))
    };

    match op {
        "greater_than" => Ok(CountOp::GreaterThan(count(value)?)),
        "less_than" => Ok(CountOp::LessThan(count(value)?)),
        _ => {
            let (min, max) = match value {
                Value::Array(bounds) if bounds.len() == 2 => (count(&bounds[0])?, count(&bounds[1])?),
                Value::Object(bounds) => {
                    let min = bounds.get("min").ok_or_else(|| invalid("missing \"min\""))?;
                    let max = bounds.get("max").ok_or_else(|| invalid("missing \"max\""))?;
                    (count(min)?, count(max)?)
                }
                _ => return Err(invalid("expected [min, max] or {\"min\", \"max\"}")),
            };
            if min > max {
                return Err(ValidationError::InvertedBounds { min, max });
            }
            Ok(CountOp::Between { min, max })
        }
    }
}

fn unknown_operator(field: &str, op: &str) -> ValidationError {
    ValidationError::UnknownOperator {
        field: field.to_string(),
        op: op.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
