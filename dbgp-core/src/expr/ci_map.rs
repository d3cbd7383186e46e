//! Case-insensitive map
//!
//! Script identifiers and function names ignore case. Keys are folded to
//! lower case on insert and lookup; the spelling of the last insert is kept
//! for display.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CiMap<V> {
    entries: HashMap<String, (String, V)>,
}

impl<V> Default for CiMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> CiMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(key: &str) -> String {
        key.to_lowercase()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        self.entries
            .insert(Self::fold(&key), (key, value))
            .map(|(_, old)| old)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(&Self::fold(key)).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(&Self::fold(key)).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Self::fold(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(&Self::fold(key)).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their original key spelling, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for CiMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = CiMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<K: Into<String>, V> Extend<(K, V)> for CiMap<V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut map = CiMap::new();
        map.insert("StrLen", 1);
        assert_eq!(map.get("strlen"), Some(&1));
        assert_eq!(map.get("STRLEN"), Some(&1));
        assert!(map.contains_key("sTrLeN"));

        assert_eq!(map.insert("STRLEN", 2), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.iter().next(), Some(("STRLEN", &2)));
    }

    #[test]
    fn test_non_ascii_keys() {
        let map: CiMap<u8> = [("Größe", 1)].into_iter().collect();
        assert_eq!(map.get("GRÖSSE"), None);
        assert_eq!(map.get("größe"), Some(&1));
    }
}
