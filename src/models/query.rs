//! Query-related data models.
//!
//! This module defines parameter and result types for statements executed
//! through the gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Structured JSON value, bound as json/jsonb
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Named parameters for a statement, in insertion order.
///
/// SQL text refers to them as `:name`. Setting a name twice replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    entries: Vec<(String, QueryParam)>,
}

impl QueryParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a parameter.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<QueryParam>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

/// Result of a write statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WriteOutcome {
    /// First column of the first row produced by a `RETURNING` clause
    Returned(JsonValue),
    /// Row count for statements without a result set
    RowsAffected(u64),
}

impl WriteOutcome {
    /// The scalar as an integer, e.g. a generated id or a row count.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Returned(v) => v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok())),
            Self::RowsAffected(n) => i64::try_from(*n).ok(),
        }
    }

    /// The scalar as a JSON value.
    pub fn into_value(self) -> JsonValue {
        match self {
            Self::Returned(v) => v,
            Self::RowsAffected(n) => JsonValue::from(n),
        }
    }

    /// Row count, if the statement returned no rows.
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            Self::RowsAffected(n) => Some(*n),
            Self::Returned(_) => None,
        }
    }
}
