//! Casting raw source values into typed document fields.
//!
//! Numeric casts never fail: anything that does not parse becomes zero.
//! Temporal casts do fail, with [`MigrateError::Cast`], so a bad date is never
//! silently written as some default timestamp.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::debug;

use crate::core::{Column, ColumnType, Document, Value, ORIGIN_ID_FIELD};
use crate::error::{MigrateError, Result};

const TRUE_VALUES: [&str; 3] = ["true", "1", "t"];
const FALSE_VALUES: [&str; 3] = ["false", "0", "f"];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M:%S%.f"];

/// Date that bare `time` values are anchored to.
pub fn time_anchor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

/// Translate one raw value through a column definition.
///
/// Returns the output fields: empty for ignored columns, `origin_identifier`
/// for key columns, `column.name()` for everything else.
pub fn translate(column: &Column, raw: Value) -> Result<Document> {
    let mut doc = Document::new();
    if column.is_ignored() {
        return Ok(doc);
    }
    if column.is_key() {
        doc.insert(ORIGIN_ID_FIELD.to_string(), raw);
        return Ok(doc);
    }

    let value = cast(column.column_type(), raw).map_err(|CastFailure { value, expected }| {
        MigrateError::cast(column.sql_name(), value, expected)
    })?;
    doc.insert(column.name().to_string(), value);
    Ok(doc)
}

/// A temporal value that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CastFailure {
    pub value: String,
    pub expected: &'static str,
}

impl CastFailure {
    fn new(value: &Value, expected: &'static str) -> Self {
        Self {
            value: value.to_string(),
            expected,
        }
    }
}

/// Cast a raw value to the given type.
pub fn cast(column_type: ColumnType, raw: Value) -> std::result::Result<Value, CastFailure> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match column_type {
        ColumnType::String
        | ColumnType::Text
        | ColumnType::Binary
        | ColumnType::Key
        | ColumnType::Ignore => Ok(raw),
        ColumnType::Integer => Ok(Value::Int(to_integer(&raw))),
        ColumnType::Float => Ok(Value::Float(to_float(&raw))),
        ColumnType::Decimal => Ok(Value::Decimal(to_decimal(&raw))),
        ColumnType::Boolean => Ok(to_boolean(&raw).map_or(Value::Null, Value::Bool)),
        ColumnType::DateTime | ColumnType::Timestamp => to_datetime(raw),
        ColumnType::Date => to_date(raw),
        ColumnType::Time => to_time(raw),
    }
}

fn to_integer(raw: &Value) -> i64 {
    match raw {
        Value::Int(v) => *v,
        Value::Float(v) if v.is_finite() => v.trunc() as i64,
        Value::Decimal(v) => v.trunc().to_i64().unwrap_or(0),
        Value::Bool(v) => i64::from(*v),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn to_float(raw: &Value) -> f64 {
    match raw {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        Value::Decimal(v) => v.to_f64().unwrap_or(0.0),
        Value::Bool(v) => f64::from(u8::from(*v)),
        Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn to_decimal(raw: &Value) -> Decimal {
    match raw {
        Value::Int(v) => Decimal::from(*v),
        Value::Decimal(v) => *v,
        // Go through the shortest textual form so 101.43 stays 101.43 exactly.
        Value::Float(v) => Decimal::from_str(&v.to_string())
            .ok()
            .or_else(|| Decimal::from_f64(*v))
            .unwrap_or(Decimal::ZERO),
        Value::Bool(v) => Decimal::from(u8::from(*v)),
        Value::Text(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .unwrap_or(Decimal::ZERO)
        }
        _ => Decimal::ZERO,
    }
}

/// `None` means null. Anything else is matched on its text form, and values
/// outside both sets read as false.
fn to_boolean(raw: &Value) -> Option<bool> {
    if let Value::Bool(v) = raw {
        return Some(*v);
    }
    let text = raw.to_string();
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    if TRUE_VALUES.contains(&text.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&text.as_str()) {
        Some(false)
    } else {
        debug!("Unrecognised boolean {} {:?}, reading as false", raw.kind(), text);
        Some(false)
    }
}

fn to_datetime(raw: Value) -> std::result::Result<Value, CastFailure> {
    match raw {
        Value::DateTime(_) => Ok(raw),
        Value::Date(d) => Ok(Value::DateTime(d.and_time(NaiveTime::MIN))),
        Value::Text(ref s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(ref s) => DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
            .map(Value::DateTime)
            .ok_or_else(|| CastFailure::new(&raw, "datetime")),
        _ => Err(CastFailure::new(&raw, "datetime")),
    }
}

fn to_date(raw: Value) -> std::result::Result<Value, CastFailure> {
    match raw {
        Value::Date(_) => Ok(raw),
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        Value::Text(ref s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(ref s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| CastFailure::new(&raw, "date")),
        _ => Err(CastFailure::new(&raw, "date")),
    }
}

fn to_time(raw: Value) -> std::result::Result<Value, CastFailure> {
    let anchor = time_anchor_date();
    match raw {
        Value::Time(t) => Ok(Value::DateTime(anchor.and_time(t))),
        Value::DateTime(dt) => Ok(Value::DateTime(anchor.and_time(dt.time()))),
        Value::Text(ref s) if s.trim().is_empty() => Ok(Value::Null),
        Value::Text(ref s) => TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(s.trim(), fmt).ok())
            .map(|t| Value::DateTime(anchor.and_time(t)))
            .ok_or_else(|| CastFailure::new(&raw, "time")),
        _ => Err(CastFailure::new(&raw, "time")),
    }
}
