//! [`NamedTable`] – insertion-ordered, name-keyed table used by every
//! registry of the driver.

use std::collections::HashMap;

use sensbridge_types::BridgeError;

/// Name → entry table that refuses duplicates and enumerates in insertion
/// order.
#[derive(Debug)]
pub struct NamedTable<T> {
    index: HashMap<String, usize>,
    entries: Vec<(String, T)>,
}

impl<T> Default for NamedTable<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<T> NamedTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `name`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateName`] if `name` is taken; the existing entry
    /// is left untouched.
    pub fn insert(&mut self, name: &str, value: T) -> Result<(), BridgeError> {
        if self.index.contains_key(name) {
            return Err(BridgeError::DuplicateName(name.to_string()));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
    }
}
