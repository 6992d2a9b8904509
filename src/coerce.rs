// =====================================================
// COLUMN VALUE COERCION AND BIND TYPES
// =====================================================
//
// Raw payload values are untyped JSON; the ERP wants native values bound
// with the column's declared type. `bind_kind` is the total mapping from
// catalog metadata to a bind shape, `coerce` applies it to one value.

use crate::catalog::ColumnMeta;
use crate::db_types::escape_sql_string;
use crate::error::{SyncError, SyncResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use std::borrow::Cow;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, ToSql};
use uuid::Uuid;

// --- Bind Kinds ---

/// The parameter shape for a column, derived from its native type name,
/// declared length, precision and scale. Total: unrecognized types fall
/// back to unbounded text and the value passes through unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Text { max: Option<usize> },
    Int,
    BigInt,
    Float,
    Decimal { precision: u8, scale: u8 },
    Bit,
    DateTime,
    Date,
    Time,
    Guid,
    Binary,
}

pub fn bind_kind(meta: &ColumnMeta) -> BindKind {
    match meta.type_lower().as_str() {
        "tinyint" | "smallint" | "int" => BindKind::Int,
        "bigint" => BindKind::BigInt,
        "bit" => BindKind::Bit,
        "float" | "real" => BindKind::Float,
        "decimal" | "numeric" => BindKind::Decimal {
            precision: meta.precision.unwrap_or(18),
            scale: meta.scale.unwrap_or(0),
        },
        "money" => BindKind::Decimal {
            precision: 19,
            scale: 4,
        },
        "smallmoney" => BindKind::Decimal {
            precision: 10,
            scale: 4,
        },
        "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => BindKind::DateTime,
        "date" => BindKind::Date,
        "time" => BindKind::Time,
        "uniqueidentifier" => BindKind::Guid,
        "binary" | "varbinary" | "image" => BindKind::Binary,
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml" => BindKind::Text {
            max: meta.char_capacity(),
        },
        _ => BindKind::Text { max: None },
    }
}

// --- Native Values ---

/// A database-native value, bindable as an `@Pn` parameter and renderable
/// as a SQL literal for multi-row flushes.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Numeric),
    Text(String),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Guid(Uuid),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::I32(None),
            SqlValue::Bool(v) => ColumnData::Bit(Some(*v)),
            SqlValue::I16(v) => ColumnData::I16(Some(*v)),
            SqlValue::I32(v) => ColumnData::I32(Some(*v)),
            SqlValue::I64(v) => ColumnData::I64(Some(*v)),
            SqlValue::F32(v) => ColumnData::F32(Some(*v)),
            SqlValue::F64(v) => ColumnData::F64(Some(*v)),
            SqlValue::Decimal(v) => ColumnData::Numeric(Some(*v)),
            SqlValue::Text(v) => ColumnData::String(Some(Cow::Borrowed(v.as_str()))),
            // Temporal values travel as ISO strings; the server converts
            // them into the column's declared type.
            SqlValue::DateTime(v) => ColumnData::String(Some(Cow::Owned(
                v.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            ))),
            SqlValue::Date(v) => {
                ColumnData::String(Some(Cow::Owned(v.format("%Y-%m-%d").to_string())))
            }
            SqlValue::Time(v) => {
                ColumnData::String(Some(Cow::Owned(v.format("%H:%M:%S%.3f").to_string())))
            }
            SqlValue::Guid(v) => ColumnData::Guid(Some(*v)),
            SqlValue::Bytes(v) => ColumnData::Binary(Some(Cow::Borrowed(v.as_slice()))),
        }
    }
}

impl SqlValue {
    /// Converts a streamed result cell into an owned value, preserving the
    /// wire type for faithful re-insertion.
    pub fn from_column_data(data: ColumnData<'static>) -> SqlValue {
        match data {
            ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null),
            ColumnData::U8(v) => v.map(|x| SqlValue::I16(x as i16)).unwrap_or(SqlValue::Null),
            ColumnData::I16(v) => v.map(SqlValue::I16).unwrap_or(SqlValue::Null),
            ColumnData::I32(v) => v.map(SqlValue::I32).unwrap_or(SqlValue::Null),
            ColumnData::I64(v) => v.map(SqlValue::I64).unwrap_or(SqlValue::Null),
            ColumnData::F32(v) => v.map(SqlValue::F32).unwrap_or(SqlValue::Null),
            ColumnData::F64(v) => v.map(SqlValue::F64).unwrap_or(SqlValue::Null),
            ColumnData::String(v) => v
                .map(|x| SqlValue::Text(x.into_owned()))
                .unwrap_or(SqlValue::Null),
            ColumnData::Guid(v) => v.map(SqlValue::Guid).unwrap_or(SqlValue::Null),
            ColumnData::Binary(v) => v
                .map(|x| SqlValue::Bytes(x.into_owned()))
                .unwrap_or(SqlValue::Null),
            ColumnData::Numeric(v) => v.map(SqlValue::Decimal).unwrap_or(SqlValue::Null),
            ColumnData::DateTime(v) => v
                .map(|x| {
                    SqlValue::DateTime(NaiveDateTime::new(
                        NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
                            + chrono::Duration::days(x.days() as i64),
                        NaiveTime::from_num_seconds_from_midnight_opt(
                            (x.seconds_fragments() as f64 / 300.0) as u32,
                            0,
                        )
                        .unwrap_or_default(),
                    ))
                })
                .unwrap_or(SqlValue::Null),
            ColumnData::SmallDateTime(v) => v
                .map(|x| {
                    SqlValue::DateTime(NaiveDateTime::new(
                        NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
                            + chrono::Duration::days(x.days() as i64),
                        NaiveTime::from_num_seconds_from_midnight_opt(
                            (x.seconds_fragments() as u32) * 60,
                            0,
                        )
                        .unwrap_or_default(),
                    ))
                })
                .unwrap_or(SqlValue::Null),
            ColumnData::DateTime2(v) => v
                .map(|x| SqlValue::DateTime(datetime2_to_naive(&x)))
                .unwrap_or(SqlValue::Null),
            ColumnData::DateTimeOffset(v) => v
                .map(|x| SqlValue::DateTime(datetime2_to_naive(&x.datetime2())))
                .unwrap_or(SqlValue::Null),
            ColumnData::Date(v) => v
                .map(|x| {
                    SqlValue::Date(
                        NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default()
                            + chrono::Duration::days(x.days() as i64),
                    )
                })
                .unwrap_or(SqlValue::Null),
            ColumnData::Time(v) => v
                .map(|x| {
                    SqlValue::Time(
                        NaiveTime::from_num_seconds_from_midnight_opt(
                            (x.increments() / 10_000_000) as u32,
                            ((x.increments() % 10_000_000) * 100) as u32,
                        )
                        .unwrap_or_default(),
                    )
                })
                .unwrap_or(SqlValue::Null),
            ColumnData::Xml(v) => v
                .map(|x| SqlValue::Text(x.into_owned().into_string()))
                .unwrap_or(SqlValue::Null),
        }
    }
}

fn datetime2_to_naive(value: &tiberius::time::DateTime2) -> NaiveDateTime {
    let date = value.date();
    let time = value.time();
    NaiveDateTime::new(
        NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default()
            + chrono::Duration::days(date.days() as i64),
        NaiveTime::from_num_seconds_from_midnight_opt(
            (time.increments() / 10_000_000) as u32,
            ((time.increments() % 10_000_000) * 100) as u32,
        )
        .unwrap_or_default(),
    )
}

// --- Coercion ---

/// Maps one raw payload value onto a column. Null and empty values become
/// typed nulls unconditionally; the NOT NULL completeness check happens in
/// the payload mapper after the whole map is built, not here.
pub fn coerce(field: &str, raw: &Value, meta: &ColumnMeta) -> SyncResult<SqlValue> {
    if is_empty_raw(raw) {
        return Ok(SqlValue::Null);
    }

    match bind_kind(meta) {
        BindKind::Text { max } => {
            let text = value_to_text(raw);
            if let Some(max) = max {
                let length = text.chars().count();
                if length > max {
                    return Err(SyncError::ValueTooLong {
                        field: field.to_string(),
                        length,
                        max,
                    });
                }
            }
            Ok(SqlValue::Text(text))
        }
        BindKind::Int | BindKind::BigInt => {
            let number = parse_finite_number(field, raw)?;
            Ok(SqlValue::I64(number.round() as i64))
        }
        BindKind::Float => Ok(SqlValue::F64(parse_finite_number(field, raw)?)),
        BindKind::Decimal { scale, .. } => {
            let number = parse_finite_number(field, raw)?;
            let scaled = (number * 10f64.powi(scale as i32)).round() as i128;
            Ok(SqlValue::Decimal(Numeric::new_with_scale(scaled, scale)))
        }
        BindKind::Bit => coerce_bit(field, raw),
        BindKind::DateTime => Ok(match parse_datetime(&value_to_text(raw)) {
            Some(dt) => SqlValue::DateTime(dt),
            None => SqlValue::Text(value_to_text(raw)),
        }),
        BindKind::Date => Ok(
            match NaiveDate::parse_from_str(value_to_text(raw).trim(), "%Y-%m-%d") {
                Ok(d) => SqlValue::Date(d),
                Err(_) => SqlValue::Text(value_to_text(raw)),
            },
        ),
        BindKind::Time => Ok(
            match NaiveTime::parse_from_str(value_to_text(raw).trim(), "%H:%M:%S") {
                Ok(t) => SqlValue::Time(t),
                Err(_) => SqlValue::Text(value_to_text(raw)),
            },
        ),
        BindKind::Guid => Ok(match Uuid::parse_str(value_to_text(raw).trim()) {
            Ok(g) => SqlValue::Guid(g),
            Err(_) => SqlValue::Text(value_to_text(raw)),
        }),
        BindKind::Binary => {
            let text = value_to_text(raw);
            let trimmed = text.trim();
            if let Some(stripped) = trimmed.strip_prefix("0x") {
                if let Ok(bytes) = hex::decode(stripped) {
                    return Ok(SqlValue::Bytes(bytes));
                }
            }
            Ok(SqlValue::Text(text))
        }
    }
}

fn coerce_bit(field: &str, raw: &Value) -> SyncResult<SqlValue> {
    match raw {
        Value::Bool(b) => Ok(SqlValue::Bool(*b)),
        Value::Number(n) => Ok(SqlValue::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(SqlValue::Bool(true)),
            "false" | "0" => Ok(SqlValue::Bool(false)),
            other => Err(SyncError::NotANumber {
                field: field.to_string(),
                raw: other.to_string(),
            }),
        },
        other => Err(SyncError::NotANumber {
            field: field.to_string(),
            raw: value_to_text(other),
        }),
    }
}

pub fn is_empty_raw(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn value_to_text(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(v) => {
            if *v {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn parse_finite_number(field: &str, raw: &Value) -> SyncResult<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(SyncError::NotANumber {
            field: field.to_string(),
            raw: value_to_text(raw),
        }),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

// --- Literal Rendering ---

/// Renders a value as a SQL literal for multi-row INSERT flushes. Strings
/// go out as N'...' with quotes doubled; binary as 0x hex.
pub fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(v) => render_float(*v as f64),
        SqlValue::F64(v) => render_float(*v),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::Text(v) => format!("N'{}'", escape_sql_string(v)),
        SqlValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%dT%H:%M:%S%.3f")),
        SqlValue::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        SqlValue::Time(v) => format!("'{}'", v.format("%H:%M:%S%.3f")),
        SqlValue::Guid(v) => format!("'{}'", v),
        SqlValue::Bytes(v) => {
            if v.is_empty() {
                "0x".to_string()
            } else {
                format!("0x{}", hex::encode(v))
            }
        }
    }
}

fn render_float(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        "NULL".to_string()
    }
}

#[cfg(test)]
mod tests;
