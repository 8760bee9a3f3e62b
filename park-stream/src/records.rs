//! Bounded, newest-first history of classified vehicle events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use park_core::constants::DEFAULT_HISTORY_CAPACITY;

use crate::events::VehicleEvent;

/// In-memory record history. Cloning shares the same buffer.
#[derive(Clone)]
pub struct RecordStore {
    buffer: Arc<Mutex<VecDeque<Arc<VehicleEvent>>>>,
    capacity: usize,
}

impl RecordStore {
    /// Create a store holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest records beyond capacity.
    pub fn append(&self, event: Arc<VehicleEvent>) {
        let mut buffer = self.lock();
        buffer.push_front(event);
        buffer.truncate(self.capacity);
    }

    /// Up to `n` records, newest first. Does not modify the store.
    pub fn latest(&self, n: usize) -> Vec<Arc<VehicleEvent>> {
        self.lock().iter().take(n).cloned().collect()
    }

    /// Most recent record.
    pub fn head(&self) -> Option<Arc<VehicleEvent>> {
        self.lock().front().cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<VehicleEvent>>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
