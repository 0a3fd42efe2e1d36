//! Concurrent handle table mapping 32-bit ids to shared objects.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use dashmap::DashMap;

/// A concurrent id-to-object table.
///
/// Handles are allocated from a monotonically increasing counter starting at
/// one, so zero is never a valid handle and stale handles are never reissued
/// within a session. Lookup returns a clone of the stored `Arc`, so callers
/// can keep using an object across its removal from the table; destruction
/// semantics live in the object itself.
#[derive(Debug)]
pub struct ObjectTable<T> {
    objects: DashMap<u32, Arc<T>>,
    next_id: AtomicU32,
}

impl<T> ObjectTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Stores `object` and returns its freshly allocated handle.
    pub fn insert(&self, object: T) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(id, Arc::new(object));
        id
    }

    /// Looks up the object behind `id`.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<T>> {
        self.objects.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `id` from the table, returning the object if it was present.
    pub fn remove(&self, id: u32) -> Option<Arc<T>> {
        self.objects.remove(&id).map(|(_, object)| object)
    }

    /// Returns the number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` when the table holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
