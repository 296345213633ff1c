//! Statement parameters and results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A result row: column name to JSON value, in column order.
pub type RowMap = serde_json::Map<String, serde_json::Value>;

/// Type of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// SELECT query returning rows
    Select,
    /// INSERT operation
    Insert,
    /// UPDATE operation
    Update,
    /// DELETE operation
    Delete,
    /// DDL, COPY, or other operations
    Other,
}

impl QueryType {
    /// Detect the type of a SQL statement from its leading keyword.
    pub fn detect(sql: &str) -> Self {
        let trimmed = sql.trim_start().to_uppercase();

        if trimmed.starts_with("SELECT")
            || trimmed.starts_with("WITH")
            || trimmed.starts_with("VALUES")
            || trimmed.starts_with("SHOW")
        {
            QueryType::Select
        } else if trimmed.starts_with("INSERT") {
            QueryType::Insert
        } else if trimmed.starts_with("UPDATE") {
            QueryType::Update
        } else if trimmed.starts_with("DELETE") {
            QueryType::Delete
        } else {
            QueryType::Other
        }
    }

    /// Check whether a statement of this type produces rows.
    ///
    /// Writes with a `RETURNING` clause produce rows too.
    pub fn returns_rows(sql: &str) -> bool {
        match Self::detect(sql) {
            QueryType::Select => true,
            QueryType::Insert | QueryType::Update | QueryType::Delete => {
                sql.to_uppercase().split_whitespace().any(|word| word == "RETURNING")
            }
            QueryType::Other => false,
        }
    }
}

/// A single bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Integer, narrowed to the column width on bind
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text (also used for UUID columns)
    Text(String),
    /// JSON document
    Json(serde_json::Value),
}

impl ParamValue {
    /// Parse a command-line literal: `null`, booleans, integers, floats, else text.
    pub fn parse_literal(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return ParamValue::Null;
        }
        if let Ok(b) = raw.parse::<bool>() {
            return ParamValue::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::Text(raw.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        ParamValue::Json(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Named statement parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedParams {
    values: HashMap<String, ParamValue>,
}

impl NamedParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to a name, replacing any previous value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over bound names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// A statement with named placeholders rewritten to positional ones.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// SQL with `$1..$n` placeholders
    pub sql: String,
    /// Values in placeholder order
    pub values: Vec<ParamValue>,
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Rows returned by a read (or a write with `RETURNING`)
    Rows(Vec<RowMap>),
    /// Rows affected by a write
    Affected(u64),
}

impl QueryOutcome {
    /// Get the returned rows, if any.
    pub fn rows(&self) -> Option<&[RowMap]> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Affected(_) => None,
        }
    }

    /// Get the affected-row count for writes, or the row count for reads.
    pub fn row_count(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(count) => *count,
        }
    }
}
