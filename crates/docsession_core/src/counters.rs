//! Per-document cache of counter values.
//!
//! The cache records partial knowledge: a name mapped to `None` is known to
//! have been asked for but has no fetched value, and `got_all` says whether
//! the cached names are the complete set for the document.

use crate::registry::CaseInsensitiveMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One counter value as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CounterDetail {
    /// Owning document.
    pub document_id: String,
    /// Counter name.
    pub counter_name: String,
    /// Current total.
    pub total_value: i64,
}

impl CounterDetail {
    /// Creates a counter detail.
    pub fn new(document_id: impl Into<String>, counter_name: impl Into<String>, total_value: i64) -> Self {
        Self {
            document_id: document_id.into(),
            counter_name: counter_name.into(),
            total_value,
        }
    }
}

/// Cached counters of one document.
#[derive(Debug, Clone, Default)]
pub struct CounterTracking {
    /// True when `data` holds every counter of the document.
    pub got_all: bool,
    data: CaseInsensitiveMap<Option<i64>>,
}

impl CounterTracking {
    /// Returns the cached value of `name`; `Some(None)` means known but
    /// not fetched.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Option<i64>> {
        self.data.get(name).copied()
    }

    /// Returns true if `name` has an entry, fetched or not.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<i64>)> {
        self.data.iter().map(|(name, value)| (name, *value))
    }

    /// Returns the number of cached names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no names are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Counter cache of a session, keyed by document id.
#[derive(Debug, Clone, Default)]
pub struct CounterCache {
    by_document: CaseInsensitiveMap<CounterTracking>,
}

impl CounterCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache entry of `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CounterTracking> {
        self.by_document.get(id)
    }

    /// Returns the number of documents with a cache entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_document.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_document.is_empty()
    }

    /// Merges counters fetched alongside documents.
    ///
    /// `to_include` maps each document id to the names that were requested;
    /// an empty list means every counter was requested.
    pub fn register_counters(
        &mut self,
        results: &BTreeMap<String, Vec<Option<CounterDetail>>>,
        to_include: &BTreeMap<String, Vec<String>>,
    ) {
        if results.is_empty() {
            for (id, names) in to_include {
                if names.is_empty() {
                    self.set_got_all(id);
                }
            }
        } else {
            for (id, details) in results {
                if id.is_empty() {
                    continue;
                }
                let requested = to_include.get(id);
                let got_all = requested.is_some_and(Vec::is_empty);
                self.merge_document(id, details, requested.map(Vec::as_slice), got_all);
            }
        }

        for (id, names) in to_include {
            self.register_missing(id, names);
        }
    }

    /// Merges counters fetched for a list of documents sharing one set of
    /// requested names.
    pub fn register_counters_for_ids(
        &mut self,
        results: &BTreeMap<String, Vec<Option<CounterDetail>>>,
        ids: &[String],
        names: &[String],
        got_all: bool,
    ) {
        if results.is_empty() {
            if got_all {
                for id in ids {
                    self.set_got_all(id);
                }
                return;
            }
        } else {
            for (id, details) in results {
                if id.is_empty() {
                    continue;
                }
                self.merge_document(id, details, Some(names), got_all);
            }
        }

        for id in ids {
            self.register_missing(id, names);
        }
    }

    /// Records each of `names` for `id` with no value, unless already cached.
    pub fn register_missing(&mut self, id: &str, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let entry = self.by_document.get_or_insert_with(id, CounterTracking::default);
        for name in names {
            if !entry.data.contains_key(name) {
                entry.data.insert(name.as_str(), None);
            }
        }
    }

    /// Updates the values of counters this cache already knows about.
    pub fn apply_totals(&mut self, details: &[CounterDetail]) {
        for detail in details {
            if let Some(entry) = self.by_document.get_mut(&detail.document_id) {
                entry
                    .data
                    .insert(detail.counter_name.as_str(), Some(detail.total_value));
            }
        }
    }

    /// Forgets cached values of `names`; the set is no longer complete.
    pub fn invalidate(&mut self, id: &str, names: &[String]) {
        if let Some(entry) = self.by_document.get_mut(id) {
            for name in names {
                entry.data.remove(name);
            }
            entry.got_all = false;
        }
    }

    /// Drops the entry of `id`.
    pub fn remove(&mut self, id: &str) -> Option<CounterTracking> {
        self.by_document.remove(id)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_document.clear();
    }

    fn set_got_all(&mut self, id: &str) {
        self.by_document
            .get_or_insert_with(id, CounterTracking::default)
            .got_all = true;
    }

    fn merge_document(
        &mut self,
        id: &str,
        details: &[Option<CounterDetail>],
        requested: Option<&[String]>,
        got_all: bool,
    ) {
        if details.is_empty() && !got_all {
            if let (Some(entry), Some(names)) = (self.by_document.get_mut(id), requested) {
                for name in names {
                    entry.data.remove(name);
                }
            }
            return;
        }

        let entry = self.by_document.get_or_insert_with(id, CounterTracking::default);
        let mut returned = HashSet::new();
        for detail in details.iter().flatten() {
            if detail.counter_name.is_empty() || detail.total_value == 0 {
                continue;
            }
            returned.insert(detail.counter_name.to_lowercase());
            entry
                .data
                .insert(detail.counter_name.as_str(), Some(detail.total_value));
        }

        if got_all {
            entry
                .data
                .retain(|name, _| returned.contains(&name.to_lowercase()));
        }
        entry.got_all = entry.got_all || got_all;
    }
}
