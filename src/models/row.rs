//! Result rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One result row: column name to JSON value, in result-set column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, JsonValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column)
    }

    /// Get a column value, treating SQL NULL as absent.
    pub fn get_non_null(&self, column: &str) -> Option<&JsonValue> {
        self.0.get(column).filter(|v| !v.is_null())
    }

    /// Remove a column and return its value, preserving the order of the rest.
    pub fn take(&mut self, column: &str) -> Option<JsonValue> {
        self.0.shift_remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }
}

impl From<Map<String, JsonValue>> for Row {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, JsonValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
