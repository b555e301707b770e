//! Copy-on-write mapping store.
//!
//! Readers take an `Arc` snapshot in O(1) and never block writers; writers
//! clone the mapping vector, apply the change, and swap the new snapshot in
//! under a short lock. A matching operation uses one snapshot for its whole
//! duration, so it observes a consistent mapping set.

use super::Mapping;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Immutable view of the store at one instant, in insertion order.
pub type Snapshot = Arc<Vec<Arc<Mapping>>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("mapping {0} already exists")]
    DuplicateId(Uuid),
    #[error("mapping {0} not found")]
    UnknownId(Uuid),
}

#[derive(Default)]
pub struct MappingStore {
    inner: RwLock<Snapshot>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// O(1) consistent snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mapping>> {
        self.inner.read().iter().find(|m| m.id == id).cloned()
    }

    /// All mappings in insertion order.
    pub fn list(&self) -> Vec<Arc<Mapping>> {
        self.inner.read().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn add(&self, mapping: Mapping) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        if guard.iter().any(|m| m.id == mapping.id) {
            return Err(StoreError::DuplicateId(mapping.id));
        }
        let mut next = guard.as_ref().clone();
        debug!(id = %mapping.id, "mapping added");
        next.push(Arc::new(mapping));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace-by-id, preserving the mapping's insertion position.
    pub fn update(&self, mapping: Mapping) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let Some(pos) = guard.iter().position(|m| m.id == mapping.id) else {
            return Err(StoreError::UnknownId(mapping.id));
        };
        let mut next = guard.as_ref().clone();
        debug!(id = %mapping.id, "mapping replaced");
        next[pos] = Arc::new(mapping);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.write();
        let Some(pos) = guard.iter().position(|m| m.id == id) else {
            return Err(StoreError::UnknownId(id));
        };
        let mut next = guard.as_ref().clone();
        next.remove(pos);
        debug!(%id, "mapping deleted");
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn reset(&self) {
        let mut guard = self.inner.write();
        debug!(count = guard.len(), "mapping store reset");
        *guard = Arc::new(Vec::new());
    }
}
