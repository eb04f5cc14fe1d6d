//! Row decoding into [`Record`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders extract the value into a [`Value`]
//!
//! MySQL and PostgreSQL classify by the column's declared type. SQLite is
//! dynamically typed, so it classifies by the storage class of each value.

use crate::db::DatabaseType;
use crate::models::{Record, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Temporal,
    Null,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }

    // MySQL reports BOOLEAN columns as TINYINT(1); both decode as integers there.
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower == "date"
        || lower == "datetime"
        || lower.starts_with("time")
        || lower == "year"
    {
        return TypeCategory::Temporal;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row to Record Trait
// =============================================================================

/// Trait for converting database rows to ordered records.
pub trait RowToRecord {
    fn to_record(&self) -> Record;
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySql);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), sqlite::decode_column(self, idx)))
            .collect()
    }
}

fn log_decode_failure(idx: usize, category: TypeCategory, err: &sqlx::Error) {
    tracing::error!(column = idx, ?category, error = %err, "Failed to decode column");
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Null => Value::Null,
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx, category),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|d| d.0).into(),
            Err(e) => {
                log_decode_failure(idx, TypeCategory::Decimal, &e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.into();
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.into();
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.into();
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.into();
        }
        // Unsigned columns; BIGINT UNSIGNED beyond i64 degrades to text.
        if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
            return v.into();
        }
        match row.try_get::<Option<u64>, _>(idx) {
            Ok(Some(v)) => i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Int),
            Ok(None) => Value::Null,
            Err(e) => {
                log_decode_failure(idx, TypeCategory::Integer, &e);
                Value::Null
            }
        }
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .into()
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.into();
        }
        row.try_get::<Option<f32>, _>(idx).ok().flatten().into()
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx).ok().flatten().into()
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Value {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_string())
            .into()
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v.map(|t| t.format("%Y-%m-%d %H:%M:%S%.f").to_string()).into();
        }
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return v.map(|t| t.to_rfc3339()).into();
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v.map(|d| d.to_string()).into();
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v.map(|t| t.to_string()).into();
        }
        decode_text(row, idx, TypeCategory::Temporal)
    }

    fn decode_text(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.into(),
            // VARBINARY-backed strings and unknown types.
            Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
                Ok(Some(bytes)) => match String::from_utf8(bytes) {
                    Ok(s) => Value::Text(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                },
                Ok(None) => Value::Null,
                Err(e) => {
                    log_decode_failure(idx, category, &e);
                    Value::Null
                }
            },
        }
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Null => Value::Null,
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx, category),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Value {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|d| d.0).into(),
            Err(e) => {
                log_decode_failure(idx, TypeCategory::Decimal, &e);
                Value::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.into();
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.into();
        }
        row.try_get::<Option<i16>, _>(idx).ok().flatten().into()
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<bool>, _>(idx).ok().flatten().into()
    }

    fn decode_float(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.into();
        }
        row.try_get::<Option<f32>, _>(idx).ok().flatten().into()
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<Vec<u8>>, _>(idx).ok().flatten().into()
    }

    fn decode_json(row: &PgRow, idx: usize) -> Value {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .map(|v| v.to_string())
            .into()
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            return v.map(|t| t.to_rfc3339()).into();
        }
        if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
            return v.map(|t| t.format("%Y-%m-%d %H:%M:%S%.f").to_string()).into();
        }
        if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
            return v.map(|d| d.to_string()).into();
        }
        if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
            return v.map(|t| t.to_string()).into();
        }
        decode_text(row, idx, TypeCategory::Temporal)
    }

    fn decode_text(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.into(),
            Err(e) => {
                log_decode_failure(idx, category, &e);
                Value::Null
            }
        }
    }
}

mod sqlite {
    use super::*;

    /// Decode by the value's storage class rather than the declared type.
    pub fn decode_column(row: &SqliteRow, idx: usize) -> Value {
        let category = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => categorize_type(raw.type_info().name(), DatabaseType::SQLite),
            Err(e) => {
                log_decode_failure(idx, TypeCategory::Unknown, &e);
                return Value::Null;
            }
        };

        let decoded = match category {
            TypeCategory::Integer | TypeCategory::Boolean => {
                row.try_get_unchecked::<i64, _>(idx).map(Value::Int)
            }
            TypeCategory::Float | TypeCategory::Decimal => {
                row.try_get_unchecked::<f64, _>(idx).map(Value::Float)
            }
            TypeCategory::Binary => row.try_get_unchecked::<Vec<u8>, _>(idx).map(Value::Bytes),
            _ => row.try_get_unchecked::<String, _>(idx).map(Value::Text),
        };
        decoded.unwrap_or_else(|e| {
            log_decode_failure(idx, category, &e);
            Value::Null
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", DatabaseType::MySql),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INT8", DatabaseType::Postgres),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("INTEGER", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySql),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::Postgres),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySql),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::Postgres),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATE", DatabaseType::Postgres),
            TypeCategory::Temporal
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("BOOLEAN", DatabaseType::Postgres),
            TypeCategory::Boolean
        );
        assert_eq!(
            categorize_type("jsonb", DatabaseType::Postgres),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("BLOB", DatabaseType::SQLite),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySql),
            TypeCategory::Text
        );
        assert_eq!(
            categorize_type("NULL", DatabaseType::SQLite),
            TypeCategory::Null
        );
        assert_eq!(
            categorize_type("UUID", DatabaseType::Postgres),
            TypeCategory::Unknown
        );
    }
}
