//! Mutable metadata wrapper exposed to application code.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single metadata entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// A plain JSON value.
    Value(Value),
    /// A nested metadata object with its own dirty flag.
    Nested(MetadataDictionary),
}

impl MetadataValue {
    /// Returns the entry as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(value) => value.as_str(),
            Self::Nested(_) => None,
        }
    }

    /// Returns the plain value, if this is not a nested dictionary.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Nested(_) => None,
        }
    }

    /// Converts the entry back to JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Nested(nested) => Value::Object(nested.to_json()),
        }
    }

    fn is_dirty(&self) -> bool {
        match self {
            Self::Value(value) => value.is_null(),
            Self::Nested(nested) => nested.is_dirty(),
        }
    }
}

/// Metadata of a tracked document, with change tracking.
///
/// Every mutation marks the dictionary dirty. Nested objects are wrapped in
/// their own dictionaries so a change deep inside the metadata is visible
/// through [`MetadataDictionary::has_dirty_entries`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDictionary {
    entries: BTreeMap<String, MetadataValue>,
    dirty: bool,
}

impl MetadataDictionary {
    /// Creates an empty, clean dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a metadata object. The result is clean.
    #[must_use]
    pub fn from_json(metadata: &Map<String, Value>) -> Self {
        let entries = metadata
            .iter()
            .map(|(key, value)| {
                let entry = match value {
                    Value::Object(nested) => MetadataValue::Nested(Self::from_json(nested)),
                    other => MetadataValue::Value(other.clone()),
                };
                (key.clone(), entry)
            })
            .collect();
        Self {
            entries,
            dirty: false,
        }
    }

    /// Returns the entry under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// Returns the entry under `key` as a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(MetadataValue::as_str)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Sets `key` to `value` and marks the dictionary dirty.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .insert(key.into(), MetadataValue::Value(value.into()));
        self.dirty = true;
    }

    /// Removes `key`, marking the dictionary dirty if it was present.
    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Returns the nested dictionary under `key` for modification.
    pub fn nested_mut(&mut self, key: &str) -> Option<&mut MetadataDictionary> {
        match self.entries.get_mut(key) {
            Some(MetadataValue::Nested(nested)) => Some(nested),
            _ => None,
        }
    }

    /// Returns true if this dictionary itself was modified.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if any entry reports itself dirty: a null value or a
    /// modified nested dictionary.
    #[must_use]
    pub fn has_dirty_entries(&self) -> bool {
        self.entries.values().any(MetadataValue::is_dirty)
    }

    /// Iterates over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Converts the dictionary back to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect()
    }
}
