//! Purpose: Convert loosely-typed JSON values into the representation a field type expects.
//! Exports: `coerce`, `CoerceError`, `parse_datetime`, `format_datetime`, `is_object_id`.
//! Role: Opt-in normalisation step run by the schema validator before constraint checks.
//! Invariants: Coercion never panics; every failure is a typed `CoerceError`.
//! Invariants: `null` passes through untouched (nullability is checked separately).
use std::fmt;

use serde_json::{Number, Value};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::core::field::TypeTag;

/// Wire format Eve uses for dates (`%a, %d %b %Y %H:%M:%S GMT`).
const EVE_DATE_FORMAT: &str =
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT";
const PLAIN_DATE_FORMAT: &str = "[year]-[month]-[day]";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoerceError {
    pub target: TypeTag,
    pub value: String,
}

impl CoerceError {
    fn new(target: TypeTag, value: &Value) -> Self {
        Self {
            target,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for CoerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot coerce {} to {}", self.value, self.target.as_str())
    }
}

impl std::error::Error for CoerceError {}

pub fn coerce(target: TypeTag, value: Value) -> Result<Value, CoerceError> {
    if value.is_null() {
        return Ok(value);
    }
    match target {
        TypeTag::Boolean => to_boolean(value),
        TypeTag::Integer => to_integer(value),
        TypeTag::Number => to_number(value),
        TypeTag::String => to_string(value),
        TypeTag::Binary => match value {
            Value::String(_) | Value::Array(_) => Ok(value),
            other => Err(CoerceError::new(target, &other)),
        },
        TypeTag::Date | TypeTag::Datetime => to_date(target, value),
        TypeTag::ObjectId => match &value {
            Value::String(raw) if is_object_id(raw.trim()) => {
                Ok(Value::String(raw.trim().to_ascii_lowercase()))
            }
            _ => Err(CoerceError::new(target, &value)),
        },
        TypeTag::Dict => match value {
            Value::Object(_) => Ok(value),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(parsed @ Value::Object(_)) => Ok(parsed),
                _ => Err(CoerceError::new(target, &Value::String(raw))),
            },
            other => Err(CoerceError::new(target, &other)),
        },
        TypeTag::List => to_array(target, value),
        TypeTag::Set => match to_array(target, value)? {
            Value::Array(items) => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Ok(Value::Array(unique))
            }
            other => Ok(other),
        },
    }
}

fn to_boolean(value: Value) -> Result<Value, CoerceError> {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::Number(num) => match num.as_f64() {
            Some(n) if n == 0.0 => Ok(Value::Bool(false)),
            Some(n) if n == 1.0 => Ok(Value::Bool(true)),
            _ => Err(CoerceError::new(TypeTag::Boolean, &value)),
        },
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(CoerceError::new(TypeTag::Boolean, &value)),
        },
        _ => Err(CoerceError::new(TypeTag::Boolean, &value)),
    }
}

fn to_integer(value: Value) -> Result<Value, CoerceError> {
    match &value {
        Value::Number(num) if num.is_i64() || num.is_u64() => Ok(value),
        Value::Number(num) => match num.as_f64() {
            Some(n) if is_whole_i64(n) => Ok(Value::from(n as i64)),
            _ => Err(CoerceError::new(TypeTag::Integer, &value)),
        },
        Value::String(raw) => {
            let trimmed = raw.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            match trimmed.parse::<f64>() {
                Ok(n) if is_whole_i64(n) => Ok(Value::from(n as i64)),
                _ => Err(CoerceError::new(TypeTag::Integer, &value)),
            }
        }
        _ => Err(CoerceError::new(TypeTag::Integer, &value)),
    }
}

/// Whole and inside `i64`, so the cast below neither truncates nor saturates.
fn is_whole_i64(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64
}

fn to_number(value: Value) -> Result<Value, CoerceError> {
    match &value {
        Value::Number(_) => Ok(value),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| CoerceError::new(TypeTag::Number, &value))
        }
        _ => Err(CoerceError::new(TypeTag::Number, &value)),
    }
}

fn to_string(value: Value) -> Result<Value, CoerceError> {
    match value {
        Value::String(_) => Ok(value),
        Value::Number(num) => Ok(Value::String(num.to_string())),
        Value::Bool(flag) => Ok(Value::String(flag.to_string())),
        other => Err(CoerceError::new(TypeTag::String, &other)),
    }
}

fn to_date(target: TypeTag, value: Value) -> Result<Value, CoerceError> {
    let parsed = match &value {
        Value::String(raw) => parse_datetime(raw),
        Value::Number(num) => num
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        _ => None,
    };
    parsed
        .and_then(format_datetime)
        .map(Value::String)
        .ok_or_else(|| CoerceError::new(target, &value))
}

fn to_array(target: TypeTag, value: Value) -> Result<Value, CoerceError> {
    match value {
        Value::Array(_) => Ok(value),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(parsed @ Value::Array(_)) => Ok(parsed),
            _ => Err(CoerceError::new(target, &Value::String(raw))),
        },
        other => Err(CoerceError::new(target, &other)),
    }
}

/// Parse the date spellings accepted on input: RFC 3339, Eve's RFC 1123
/// variant, RFC 2822, and a bare `YYYY-MM-DD`.
pub fn parse_datetime(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    if let Ok(format) = time::format_description::parse(EVE_DATE_FORMAT) {
        if let Ok(parsed) = PrimitiveDateTime::parse(raw, format.as_slice()) {
            return Some(parsed.assume_utc());
        }
    }
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc2822) {
        return Some(parsed);
    }
    let format = time::format_description::parse(PLAIN_DATE_FORMAT).ok()?;
    Date::parse(raw, format.as_slice())
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Render a timestamp in the format Eve stores and returns.
pub fn format_datetime(value: OffsetDateTime) -> Option<String> {
    let format = time::format_description::parse(EVE_DATE_FORMAT).ok()?;
    value.to_offset(UtcOffset::UTC).format(format.as_slice()).ok()
}

pub fn is_object_id(raw: &str) -> bool {
    raw.len() == 24 && raw.bytes().all(|b| b.is_ascii_hexdigit())
}
