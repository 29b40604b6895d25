//! Synchronized insertion-ordered dictionary
//!
//! Entries are kept in a linked list in insertion order. Lookups walk the
//! list and compare keys through the key policy, so cost is linear in the
//! number of entries. Sized for small maps such as the thread registry.

use super::ObjectPolicy;
use crate::interlocked::{DList, EntryKey};
use crate::lock;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe key/value list. Clones share the same storage.
pub struct Dictionary<K, V> {
    inner: Arc<Mutex<DictionaryState<K, V>>>,
}

pub struct DictionaryState<K, V> {
    entries: DList<(K, V)>,
    keys: ObjectPolicy<K>,
    values: ObjectPolicy<V>,
}

pub type DictionaryGuard<'a, K, V> = MutexGuard<'a, DictionaryState<K, V>>;

impl<K: PartialEq, V> DictionaryState<K, V> {
    fn find(&self, key: &K) -> Option<EntryKey> {
        self.entries.find(|(k, _)| self.keys.matches(k, key))
    }

    /// Append an entry. Returns `false` and leaves the map unchanged if the
    /// key is already present.
    pub fn add(&mut self, key: K, value: V) -> bool {
        if self.find(&key).is_some() {
            return false;
        }
        let key = self.keys.admit(key);
        let value = self.values.admit(value);
        self.entries.insert_tail((key, value));
        true
    }

    /// Remove an entry, handing its key and value to the free hooks
    pub fn remove(&mut self, key: &K) -> bool {
        match self.take(key) {
            Some(value) => {
                self.values.discard(value);
                true
            }
            None => false,
        }
    }

    /// Remove an entry and return its value to the caller
    pub fn take(&mut self, key: &K) -> Option<V> {
        let entry = self.find(key)?;
        let (k, v) = self.entries.remove(entry)?;
        self.keys.discard(k);
        Some(v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let entry = self.find(key)?;
        self.entries.get(entry).map(|(_, v)| v)
    }

    /// Replace the value of an existing entry. The old value goes to the
    /// free hook. Returns `false` if the key is absent.
    pub fn set_value(&mut self, key: &K, value: V) -> bool {
        let Some(entry) = self.find(key) else {
            return false;
        };
        let value = self.values.admit(value);
        match self.entries.get_mut(entry) {
            Some((_, slot)) => {
                let old = std::mem::replace(slot, value);
                self.values.discard(old);
                true
            }
            None => false,
        }
    }
}

impl<K, V> DictionaryState<K, V> {
    /// Remove the oldest entry
    pub fn remove_head(&mut self) -> Option<(K, V)> {
        self.entries.remove_head()
    }

    pub fn clear(&mut self) {
        while let Some((k, v)) = self.entries.remove_head() {
            self.keys.discard(k);
            self.values.discard(v);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl<K, V> Dictionary<K, V> {
    pub fn new() -> Self {
        Self::with_policies(ObjectPolicy::new(), ObjectPolicy::new())
    }

    pub fn with_policies(keys: ObjectPolicy<K>, values: ObjectPolicy<V>) -> Self {
        Dictionary {
            inner: Arc::new(Mutex::new(DictionaryState {
                entries: DList::new(),
                keys,
                values,
            })),
        }
    }

    /// Hold the dictionary lock across several operations
    pub fn lock(&self) -> DictionaryGuard<'_, K, V> {
        lock(&self.inner)
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.lock().keys()
    }

    pub fn remove_head(&self) -> Option<(K, V)> {
        self.lock().remove_head()
    }
}

impl<K: PartialEq, V> Dictionary<K, V> {
    pub fn add(&self, key: K, value: V) -> bool {
        self.lock().add(key, value)
    }

    pub fn remove(&self, key: &K) -> bool {
        self.lock().remove(key)
    }

    pub fn take(&self, key: &K) -> Option<V> {
        self.lock().take(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.lock().get(key).cloned()
    }

    pub fn set_value(&self, key: &K, value: V) -> bool {
        self.lock().set_value(key, value)
    }
}

impl<K, V> Default for Dictionary<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for Dictionary<K, V> {
    fn clone(&self) -> Self {
        Dictionary {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for Dictionary<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dictionary").field("len", &self.len()).finish()
    }
}
