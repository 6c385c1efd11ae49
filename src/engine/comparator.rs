// Scalar comparison for order-document values
//
// Conditions compare a value looked up from the order document against the
// value written in the rule. Both sides are untyped JSON scalars, so the
// comparator tries a sequence of coercions and the first one that accepts
// both operands decides: date, then number, then bool, then string.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::cmp::Ordering;

use crate::engine::error::CompareError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Outcome of a three-way scalar comparison.
///
/// `Unordered` is produced only for unequal booleans: the pair satisfies
/// `!=` and nothing else, so strict inequalities on bools are always false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    Equal,
    Greater,
    Unordered,
}

impl From<Ordering> for Comparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Comparison::Less,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Greater,
        }
    }
}

/// Three-way compare of an order-document value (`left`) against a condition
/// value (`right`).
///
/// Identical text in two different kinds never compares equal: number 200
/// versus string "200" is incomparable rather than silently equal.
pub fn compare(left: &Value, right: &Value) -> Result<Comparison, CompareError> {
    if let Some(result) = compare_as_dates(left, right)? {
        return Ok(result);
    }

    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return Ok(l.total_cmp(&r).into());
    }

    if let (Value::Bool(l), Value::Bool(r)) = (left, right) {
        return Ok(if l == r {
            Comparison::Equal
        } else {
            Comparison::Unordered
        });
    }

    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Ok(l.cmp(r).into());
    }

    Err(CompareError::Incomparable)
}

/// Date coercion, engaged when at least one operand is a `YYYY-MM-DD`
/// string. The other side may be another date string or a UNIX-millis
/// integer; a non-date string on the other side is an error, anything else
/// falls through to the remaining coercions.
fn compare_as_dates(left: &Value, right: &Value) -> Result<Option<Comparison>, CompareError> {
    match (as_date(left), as_date(right)) {
        (Some(l), Some(r)) => Ok(Some(l.cmp(&r).into())),
        (Some(l), None) => match as_millis(right) {
            Some(r) => Ok(Some(l.cmp(&r).into())),
            None if right.is_string() => Err(CompareError::DateParseMismatch),
            None => Ok(None),
        },
        (None, Some(r)) => match as_millis(left) {
            Some(l) => Ok(Some(l.cmp(&r).into())),
            None if left.is_string() => Err(CompareError::DateParseMismatch),
            None => Ok(None),
        },
        (None, None) => Ok(None),
    }
}

fn as_date(value: &Value) -> Option<NaiveDateTime> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn as_millis(value: &Value) -> Option<NaiveDateTime> {
    let millis = value.as_i64()?;
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
