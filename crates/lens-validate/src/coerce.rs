//! Literal coercion: JSON values from the model into typed `Literal`s

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lens_ir::{FieldSpec, FilterOperator, Literal, ScalarKind};
use lens_registry::ValueShape;
use serde_json::Value;
use std::cmp::Ordering;

const MAX_SET_SIZE: usize = 1000;

/// Coerce `value` into the literal `operator` expects on `field`.
///
/// The error is a human-readable reason; the caller attaches the location.
pub fn coerce_literal(
    value: &Value,
    field: &FieldSpec,
    operator: FilterOperator,
    shape: ValueShape,
) -> Result<Literal, String> {
    match shape {
        ValueShape::Scalar => {
            if value.is_null() {
                return Err(format!(
                    "{} needs a value; use is-null to match missing values",
                    operator
                ));
            }
            comparable(value, field, operator)
        }
        ValueShape::Pair => {
            let items = value
                .as_array()
                .filter(|items| items.len() == 2)
                .ok_or_else(|| format!("{} needs a [low, high] pair", operator))?;
            let low = comparable(&items[0], field, operator)?;
            let high = comparable(&items[1], field, operator)?;
            if compare(&low, &high) == Some(Ordering::Greater) {
                return Err(format!("range is empty: {} is after {}", low, high));
            }
            Ok(Literal::List(vec![low, high]))
        }
        ValueShape::List => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{} needs a list of values", operator))?;
            if items.is_empty() {
                return Err(format!("{} needs at least one value", operator));
            }
            if items.len() > MAX_SET_SIZE {
                return Err(format!("{} accepts at most {} values", operator, MAX_SET_SIZE));
            }
            items
                .iter()
                .map(|item| coerce_scalar(item, field))
                .collect::<Result<Vec<_>, _>>()
                .map(Literal::List)
        }
        ValueShape::Flag => match value {
            Value::Null => Ok(Literal::Boolean(true)),
            Value::Bool(b) => Ok(Literal::Boolean(*b)),
            Value::String(s) => parse_bool(s)
                .map(Literal::Boolean)
                .ok_or_else(|| format!("{} expects true or false, got '{}'", operator, s)),
            other => Err(format!("{} expects true or false, got {}", operator, other)),
        },
        ValueShape::Needle => match value {
            Value::String(s) if !s.is_empty() => Ok(Literal::Text(s.clone())),
            Value::Number(n) => Ok(Literal::Text(n.to_string())),
            other => Err(format!("{} expects non-empty text, got {}", operator, other)),
        },
        ValueShape::DatePart { min, max } => {
            let part = integer(value)
                .ok_or_else(|| format!("{} expects a whole number", operator))?;
            if !(min..=max).contains(&part) {
                return Err(format!("{} {} is out of range ({}-{})", operator, part, min, max));
            }
            Ok(Literal::Integer(part))
        }
    }
}

/// A scalar used with a comparison. Ordered comparisons on text fields only
/// make sense for ISO-formatted dates stored as text.
fn comparable(value: &Value, field: &FieldSpec, operator: FilterOperator) -> Result<Literal, String> {
    let literal = coerce_scalar(value, field)?;
    if operator.is_ordering() && field.kind == ScalarKind::Text {
        if let Literal::Text(text) = &literal {
            if parse_date(text).is_none() && parse_datetime(text).is_none() {
                return Err(format!(
                    "{} on text field '{}' needs an ISO date (YYYY-MM-DD) or datetime, got '{}'",
                    operator, field.name, text
                ));
            }
        }
    }
    Ok(literal)
}

/// Coerce one JSON value to the kind of `field`
pub fn coerce_scalar(value: &Value, field: &FieldSpec) -> Result<Literal, String> {
    let mismatch = || format!("{} is not a valid {} for '{}'", value, field.kind, field.name);

    match field.kind {
        ScalarKind::Text => match value {
            Value::String(s) => Ok(Literal::Text(s.clone())),
            Value::Number(n) => Ok(Literal::Text(n.to_string())),
            _ => Err(mismatch()),
        },
        ScalarKind::Choice => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(mismatch()),
            };
            if !field.choices.is_empty() && !field.choices.contains(&text) {
                return Err(format!(
                    "'{}' is not one of the choices of '{}': {}",
                    text,
                    field.name,
                    field.choices.join(", ")
                ));
            }
            Ok(Literal::Text(text))
        }
        ScalarKind::Integer => integer(value).map(Literal::Integer).ok_or_else(mismatch),
        ScalarKind::Decimal => {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|n| n.is_finite())
                .map(Literal::Decimal)
                .ok_or_else(mismatch)
        }
        ScalarKind::Boolean => match value {
            Value::Bool(b) => Ok(Literal::Boolean(*b)),
            Value::String(s) => parse_bool(s).map(Literal::Boolean).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ScalarKind::Date => value
            .as_str()
            .and_then(parse_date)
            .map(Literal::Date)
            .ok_or_else(|| {
                format!(
                    "{} is not an ISO date (YYYY-MM-DD) for '{}'",
                    value, field.name
                )
            }),
        ScalarKind::DateTime => value
            .as_str()
            .and_then(parse_datetime)
            .map(Literal::DateTime)
            .ok_or_else(|| {
                format!(
                    "{} is not an ISO datetime (YYYY-MM-DDTHH:MM:SS) for '{}'",
                    value, field.name
                )
            }),
    }
}

/// Integral numbers only; `2.5` is rejected rather than truncated
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc()))
        .or_else(|| parse_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn compare(a: &Literal, b: &Literal) -> Option<Ordering> {
    match (a, b) {
        (Literal::Integer(x), Literal::Integer(y)) => Some(x.cmp(y)),
        (Literal::Decimal(x), Literal::Decimal(y)) => x.partial_cmp(y),
        (Literal::Date(x), Literal::Date(y)) => Some(x.cmp(y)),
        (Literal::DateTime(x), Literal::DateTime(y)) => Some(x.cmp(y)),
        (Literal::Text(x), Literal::Text(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
