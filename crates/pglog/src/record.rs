//! Structured log records
//!
//! A [`Record`] maps field names to [`Value`]s and remembers the order in
//! which fields were inserted; JSON formatting and JSON-mode column
//! derivation both rely on that order.

use indexmap::IndexMap;
use pglog_rdbc::Value;

use crate::error::{Error, Result};

/// One structured log event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object, keeping its key order
    pub fn from_json_str(text: &str) -> Result<Self> {
        let fields: IndexMap<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| Error::Decode(format!("record is not a JSON object: {}", e)))?;

        Ok(fields.into_iter().collect())
    }

    /// Insert a field; an existing field keeps its position
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Mutable access to values in insertion order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode as a JSON object text, keys in insertion order.
    ///
    /// Byte strings must be valid UTF-8 to be representable.
    pub fn to_json_string(&self) -> Result<String> {
        let mut object = IndexMap::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            object.insert(name.as_str(), value_to_json(name, value)?);
        }

        serde_json::to_string(&object).map_err(|e| Error::encoding("<record>", e.to_string()))
    }
}

fn value_to_json(field: &str, value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int64(n) => serde_json::Value::from(*n),
        Value::Float64(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => serde_json::Value::String(s.to_owned()),
            Err(e) => {
                return Err(Error::encoding(
                    field,
                    format!("source sequence is illegal/malformed utf-8: {}", e),
                ))
            }
        },
        Value::Json(j) => j.clone(),
    })
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
