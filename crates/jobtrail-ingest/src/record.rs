//! Canonical record tree
//!
//! A [`Record`] is an ordered map from field name to [`Value`]. Values keep their type
//! until serialization so a whole record can be nested under a payload field and then
//! reshaped by field operations without a round trip through JSON text.
//!
//! Paths used by [`Record::get_path`], [`Record::set_path`] and
//! [`Record::remove_path`] are dot separated (`event.job_name`).

use chrono::{DateTime, NaiveDateTime, Utc};
use jobtrail_common::time;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
    /// Wall-clock time on the monitored server, no offset attached
    LocalTime(NaiveDateTime),
    Record(Record),
}

impl Value {
    /// True for the empty string; every other value counts as set
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Str(s) if s.is_empty())
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(s) => serializer.serialize_str(s),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Timestamp(ts) => serializer.serialize_str(&time::format_utc(ts)),
            Value::LocalTime(ts) => serializer.serialize_str(&time::format_local(ts)),
            Value::Record(r) => r.serialize(serializer),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::LocalTime(ts)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

/// Field map serialized as a JSON object with keys in sorted order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a top-level field
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Set a top-level field only when it is missing or holds an empty string
    pub fn set_if_empty(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if self.fields.get(&key).is_none_or(Value::is_empty) {
            self.fields.insert(key, value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a dotted path
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.as_record()?.fields.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate records as needed
    ///
    /// A non-record value sitting on an intermediate segment is replaced by a record.
    pub fn set_path(&mut self, path: &str, value: Value) {
        match path.split_once('.') {
            None => {
                self.fields.insert(path.to_string(), value);
            },
            Some((head, rest)) => {
                let slot = self
                    .fields
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Record(Record::new()));
                if !matches!(slot, Value::Record(_)) {
                    *slot = Value::Record(Record::new());
                }
                if let Value::Record(child) = slot {
                    child.set_path(rest, value);
                }
            },
        }
    }

    /// Remove a dotted path and return what was there
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => self.fields.remove(path),
            Some((head, rest)) => match self.fields.get_mut(head)? {
                Value::Record(child) => child.remove_path(rest),
                _ => None,
            },
        }
    }

    /// Serialize to a single-line JSON document
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
