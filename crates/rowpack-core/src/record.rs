//! The schema-less exchange unit shared by every component in this crate.
//!
//! A [`Record`] is a string-keyed mapping of dynamically typed scalar
//! [`Value`]s. Upstream collectors hand batches of records to the columnar
//! writer; the columnar reader and the flattener hand them back. The backing
//! store is a `BTreeMap`, so iteration order is always lexicographic by field
//! name. That ordering is load-bearing: schema inference enumerates a sample
//! record's fields in iteration order, and a sorted map is what makes the
//! inferred column order deterministic across runs and platforms.
//!
//! Values are scalars (integer, float, string, boolean, timestamp). A value
//! may also hold a nested `Record`; only the flattener produces those, and
//! schema inference rejects them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A dynamically typed scalar value carried by a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// A boolean.
    Bool(bool),
    /// A UTC instant, stored with millisecond precision on disk.
    Timestamp(DateTime<Utc>),
    /// A nested record, produced by flattening composite values.
    Record(Record),
}

impl Value {
    /// Return the float payload, or `None` for any other variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the integer payload, or `None` for any other variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the string payload, or `None` for any other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Return the boolean payload, or `None` for any other variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the timestamp payload, or `None` for any other variant.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Short lowercase name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::Str(_) => "utf8",
            Value::Bool(_) => "bool",
            Value::Timestamp(_) => "timestamp_ms",
            Value::Record(_) => "record",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

/// An ordered, string-keyed mapping of dynamically typed values.
///
/// Iteration is lexicographic by field name. Equality is field-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value under `name`, replacing and returning any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Remove a field by name, returning its value if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Whether a field with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in lexicographic name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Project the record onto `fields`, skipping names that are absent.
    pub fn subset(&self, fields: &[&str]) -> Record {
        let mut out = Record::new();
        for name in fields {
            if let Some(value) = self.fields.get(*name) {
                out.fields.insert((*name).to_string(), value.clone());
            }
        }
        out
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Record { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
