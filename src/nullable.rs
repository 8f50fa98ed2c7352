//! Nullable scalars for columns whose storage class is not reliable.
//!
//! The library database declares most columns as VARCHAR but the owning
//! application writes integers into some of them (and numeric text into
//! integer columns). These wrappers read whatever is stored and write either the
//! value or SQL NULL.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NullString(pub Option<String>);

impl NullString {
    /// The value, or an empty string for NULL.
    pub fn or_empty(&self) -> String {
        self.0.clone().unwrap_or_default()
    }
}

impl fmt::Display for NullString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or(""))
    }
}

impl FromSql for NullString {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => NullString(None),
            ValueRef::Integer(i) => NullString(Some(i.to_string())),
            ValueRef::Real(f) => NullString(Some(f.to_string())),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                NullString(Some(String::from_utf8_lossy(t).into_owned()))
            }
        })
    }
}

impl ToSql for NullString {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match &self.0 {
            Some(s) => ToSqlOutput::from(s.as_str()),
            None => ToSqlOutput::Owned(Value::Null),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NullInt64(pub Option<i64>);

impl NullInt64 {
    pub fn or_zero(&self) -> i64 {
        self.0.unwrap_or(0)
    }
}

impl fmt::Display for NullInt64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v}"),
            None => Ok(()),
        }
    }
}

impl FromSql for NullInt64 {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(NullInt64(None)),
            ValueRef::Integer(i) => Ok(NullInt64(Some(i))),
            ValueRef::Real(f) => Ok(NullInt64(Some(f as i64))),
            ValueRef::Text(t) => {
                let text = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                let text = text.trim();
                if text.is_empty() {
                    return Ok(NullInt64(None));
                }
                text.parse::<i64>()
                    .map(|v| NullInt64(Some(v)))
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for NullInt64 {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Some(v) => ToSqlOutput::from(v),
            None => ToSqlOutput::Owned(Value::Null),
        })
    }
}
