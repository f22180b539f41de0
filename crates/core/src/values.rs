//! Typed cell values.
//!
//! Rows come back from an edit surface as plain strings. Every column is read
//! through [`Cell`] (absent / blank / filled) and converted to a
//! [`FieldValue`] according to its [`ColumnKind`], so comparison against the
//! stored record is done on typed values rather than on text.

use std::collections::BTreeMap;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::errors::RowFailure;

// ---------------------------------------------------------------------------
// Column kinds and values
// ---------------------------------------------------------------------------

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Integer,
    Text,
    Bool,
}

impl ColumnKind {
    fn describe(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Bool => "boolean",
        }
    }
}

/// A single typed field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Decode a SQLite value for a column of the given kind.
    pub fn from_sql(value: ValueRef<'_>, kind: ColumnKind) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => match kind {
                ColumnKind::Bool => Self::Bool(i != 0),
                ColumnKind::Integer => Self::Integer(i),
                ColumnKind::Text => Self::Text(i.to_string()),
            },
            ValueRef::Real(f) => Self::Text(f.to_string()),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Self::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }

    /// Text rendering used when exporting to an edit surface.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            other => f.write_str(&other.render()),
        }
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Presence of a column in a submitted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell<'a> {
    /// The column does not appear in the row at all.
    Absent,
    /// The column is present but empty or whitespace.
    Blank,
    Filled(&'a str),
}

/// How a blank text cell is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankPolicy {
    /// A blank text cell is the empty string.
    Keep,
    /// A blank cell of any kind is NULL.
    Null,
}

impl<'a> Cell<'a> {
    /// Convert to a typed value. `Absent` yields `None`.
    pub fn parse(
        self,
        column: &str,
        kind: ColumnKind,
        blank: BlankPolicy,
    ) -> Result<Option<FieldValue>, RowFailure> {
        let text = match self {
            Cell::Absent => return Ok(None),
            Cell::Blank => {
                return Ok(Some(match (kind, blank) {
                    (ColumnKind::Text, BlankPolicy::Keep) => FieldValue::Text(String::new()),
                    _ => FieldValue::Null,
                }))
            }
            Cell::Filled(text) => text,
        };

        let invalid = || RowFailure::InvalidValue {
            column: column.to_string(),
            value: text.to_string(),
            expected: kind.describe().to_string(),
        };

        let value = match kind {
            ColumnKind::Text => FieldValue::Text(text.to_string()),
            ColumnKind::Integer => {
                FieldValue::Integer(text.trim().parse::<i64>().map_err(|_| invalid())?)
            }
            ColumnKind::Bool => FieldValue::Bool(parse_bool(text).ok_or_else(invalid)?),
        };
        Ok(Some(value))
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sheet rows
// ---------------------------------------------------------------------------

/// One row as exchanged with an edit surface: column name to cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetRow(BTreeMap<String, String>);

impl SheetRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    /// Read a column as a [`Cell`].
    pub fn cell(&self, column: &str) -> Cell<'_> {
        match self.0.get(column) {
            None => Cell::Absent,
            Some(v) if v.trim().is_empty() => Cell::Blank,
            Some(v) => Cell::Filled(v),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SheetRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
