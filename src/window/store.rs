//! Bounded, de-duplicated, most-recent-first reading window.

use crate::error::{FeedError, Result};
use crate::types::{Reading, ReadingId};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

/// In-memory window over the newest readings.
///
/// Position 0 is the most recently inserted (or re-inserted) reading. The
/// window never holds more than `capacity` readings and never holds two
/// readings with the same id. Display order follows arrival, not
/// `timestamp`.
pub struct ReadingStore {
    /// Recency order doubles as display order: MRU is position 0.
    entries: LruCache<ReadingId, Reading>,
}

impl ReadingStore {
    /// Create an empty window holding at most `capacity` readings.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Like `new`, but rejects a zero capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| FeedError::InvalidConfig("capacity must be > 0".into()))?;
        Ok(Self::new(capacity))
    }

    /// Replace the whole window with `records`, keeping the first
    /// `capacity` of them in their given order.
    ///
    /// A repeated id keeps its first occurrence.
    pub fn seed(&mut self, records: impl IntoIterator<Item = Reading>) {
        let capacity = self.capacity();
        let mut seen = HashSet::new();
        let kept: Vec<Reading> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .take(capacity)
            .collect();

        self.entries.clear();
        // Push oldest first so the head of `kept` ends up at position 0.
        for reading in kept.into_iter().rev() {
            self.entries.push(reading.id.clone(), reading);
        }
    }

    /// Place `record` at position 0, dropping any older copy of it.
    ///
    /// Returns the id evicted from the back, if the window was full.
    pub fn upsert_front(&mut self, record: Reading) -> Option<ReadingId> {
        let id = record.id.clone();
        match self.entries.push(id.clone(), record) {
            Some((old_id, _)) if old_id != id => Some(old_id),
            _ => None,
        }
    }

    /// Replace the reading with the same id where it stands.
    ///
    /// An update for a reading outside the window is dropped; returns
    /// whether anything changed.
    pub fn upsert_in_place(&mut self, record: Reading) -> bool {
        match self.entries.peek_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Remove the reading with `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &ReadingId) -> bool {
        self.entries.pop(id).is_some()
    }

    /// Current window, position 0 first.
    pub fn snapshot(&self) -> Vec<Reading> {
        self.entries.iter().map(|(_, r)| r.clone()).collect()
    }

    /// The reading at position 0.
    pub fn latest(&self) -> Option<&Reading> {
        self.entries.iter().next().map(|(_, r)| r)
    }

    pub fn get(&self, id: &ReadingId) -> Option<&Reading> {
        self.entries.peek(id)
    }

    pub fn contains(&self, id: &ReadingId) -> bool {
        self.entries.contains(id)
    }

    /// Display position of `id`.
    pub fn position(&self, id: &ReadingId) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
