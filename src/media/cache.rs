//! Keyed cache of local handles.

use std::collections::HashMap;

use crate::models::ImageKey;

use super::{HandleStore, LocalHandle};

/// Map from image key to live handle.
///
/// Entries leave the cache only through [`MediaCache::remove`] and
/// [`MediaCache::clear`], both of which revoke the handle they drop.
#[derive(Debug, Default)]
pub struct MediaCache {
    entries: HashMap<ImageKey, LocalHandle>,
}

impl MediaCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle. If the key was already cached the existing handle is
    /// kept and the new one is revoked.
    pub fn insert(&mut self, key: ImageKey, handle: LocalHandle, store: &HandleStore) -> LocalHandle {
        if let Some(existing) = self.entries.get(&key) {
            store.revoke(&handle);
            return existing.clone();
        }
        self.entries.insert(key, handle.clone());
        handle
    }

    /// Look up a handle.
    pub fn get(&self, key: &ImageKey) -> Option<&LocalHandle> {
        self.entries.get(key)
    }

    /// Check if a key is cached.
    pub fn contains(&self, key: &ImageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop an entry and revoke its handle. Returns whether anything was removed.
    pub fn remove(&mut self, key: &ImageKey, store: &HandleStore) -> bool {
        match self.entries.remove(key) {
            Some(handle) => {
                store.revoke(&handle);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, revoking each handle. Returns the number removed.
    pub fn clear(&mut self, store: &HandleStore) -> usize {
        let count = self.entries.len();
        for (_, handle) in self.entries.drain() {
            store.revoke(&handle);
        }
        count
    }

    /// Copy of the current mapping
    pub fn snapshot(&self) -> HashMap<ImageKey, LocalHandle> {
        self.entries.clone()
    }

    /// Get the number of cached handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
