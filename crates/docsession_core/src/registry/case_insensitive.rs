//! Case-insensitive keyed collections.

use indexmap::IndexMap;

fn normalize(key: &str) -> String {
    key.to_lowercase()
}

/// An insertion-ordered map whose string keys compare case-insensitively.
///
/// The key as first inserted is kept for iteration.
#[derive(Debug, Clone)]
pub struct CaseInsensitiveMap<V> {
    entries: IndexMap<String, (String, V)>,
}

impl<V> Default for CaseInsensitiveMap<V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<V> CaseInsensitiveMap<V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        self.entries
            .insert(normalize(&key), (key, value))
            .map(|(_, previous)| previous)
    }

    /// Returns the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&normalize(key)).map(|(_, value)| value)
    }

    /// Returns the value under `key` for modification.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries
            .get_mut(&normalize(key))
            .map(|(_, value)| value)
    }

    /// Returns the value under `key`, inserting one built by `f` if absent.
    pub fn get_or_insert_with(&mut self, key: &str, f: impl FnOnce() -> V) -> &mut V {
        &mut self
            .entries
            .entry(normalize(key))
            .or_insert_with(|| (key.to_string(), f()))
            .1
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    /// Removes `key`, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries
            .shift_remove(&normalize(key))
            .map(|(_, value)| value)
    }

    /// Iterates over `(original key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Iterates over values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().map(|(_, value)| value)
    }

    /// Keeps only the entries for which `f` returns true.
    pub fn retain(&mut self, mut f: impl FnMut(&str, &mut V) -> bool) {
        self.entries.retain(|_, (key, value)| f(key, value));
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An insertion-ordered set of case-insensitive strings.
#[derive(Debug, Clone, Default)]
pub struct CaseInsensitiveSet {
    inner: CaseInsensitiveMap<()>,
}

impl CaseInsensitiveSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key`. Returns false if it was already present.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, ());
        true
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Removes `key`. Returns false if it was absent.
    pub fn remove(&mut self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Iterates over the keys as first inserted.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(|(key, ())| key)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_ignores_case() {
        let mut map = CaseInsensitiveMap::new();
        assert!(map.insert("Products/1", 1).is_none());
        assert_eq!(map.insert("PRODUCTS/1", 2), Some(1));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("products/1"), Some(&2));
        assert_eq!(map.iter().next(), Some(("PRODUCTS/1", &2)));
    }

    #[test]
    fn map_remove_keeps_order() {
        let mut map = CaseInsensitiveMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);
        assert_eq!(map.remove("B"), Some(2));
        let keys: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[test]
    fn set_insert_is_idempotent() {
        let mut set = CaseInsensitiveSet::new();
        assert!(set.insert("orders/1"));
        assert!(!set.insert("Orders/1"));
        assert!(set.contains("ORDERS/1"));
        assert!(set.remove("orders/1"));
        assert!(!set.contains("orders/1"));
    }
}
