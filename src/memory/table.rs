//! Process-local table of shared segments keyed by handle id

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::error::Result;

use super::{buffer::MemoryBuffer, handle::SegmentHandle};

/// Table of buffers backed by shared segments, keyed by [`SegmentHandle::id`]
///
/// Entries are weak: a segment stays mapped only while some array in this
/// process still references its buffer. Lookups and inserts go through one
/// mutex so concurrent requests for the same handle map it at most once.
#[derive(Debug, Default)]
pub struct SegmentTable {
    entries: Mutex<HashMap<String, Weak<MemoryBuffer>>>,
}

impl SegmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a buffer as the local owner of `handle`
    pub fn register(&self, handle: &SegmentHandle, buffer: &Arc<MemoryBuffer>) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.insert(handle.id(), Arc::downgrade(buffer));
        Ok(())
    }

    /// Live buffer for `handle`, if any
    pub fn get(&self, handle: &SegmentHandle) -> Result<Option<Arc<MemoryBuffer>>> {
        let entries = self.entries.lock()?;
        Ok(entries.get(&handle.id()).and_then(Weak::upgrade))
    }

    /// Return the live buffer for `handle` or create one with `create`
    ///
    /// The flag is true when `create` ran. `create` is called with the table
    /// lock held and must not touch the table itself.
    pub fn get_or_try_insert_with<F>(
        &self,
        handle: &SegmentHandle,
        create: F,
    ) -> Result<(Arc<MemoryBuffer>, bool)>
    where
        F: FnOnce() -> Result<Arc<MemoryBuffer>>,
    {
        let key = handle.id();
        let mut entries = self.entries.lock()?;

        if let Some(buffer) = entries.get(&key).and_then(Weak::upgrade) {
            return Ok((buffer, false));
        }

        let buffer = create()?;
        entries.insert(key, Arc::downgrade(&buffer));
        Ok((buffer, true))
    }

    /// Forget `handle`; returns whether an entry existed
    pub fn remove(&self, handle: &SegmentHandle) -> Result<bool> {
        let mut entries = self.entries.lock()?;
        Ok(entries.remove(&handle.id()).is_some())
    }

    /// Drop entries whose buffers are gone; returns how many were removed
    pub fn purge_stale(&self) -> Result<usize> {
        let mut entries = self.entries.lock()?;
        let before = entries.len();
        entries.retain(|_, buffer| buffer.strong_count() > 0);
        Ok(before - entries.len())
    }

    /// Number of entries, live or stale; a poisoned table reads as empty
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries whose buffers are still alive
    pub fn live_count(&self) -> Result<usize> {
        let entries = self.entries.lock()?;
        Ok(entries.values().filter(|b| b.strong_count() > 0).count())
    }

    /// Ids of all entries
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock()?;
        Ok(entries.keys().cloned().collect())
    }

    /// Total bytes of live shared buffers
    pub fn total_live_bytes(&self) -> Result<usize> {
        let entries = self.entries.lock()?;
        Ok(entries
            .values()
            .filter_map(Weak::upgrade)
            .map(|buffer| buffer.len())
            .sum())
    }
}
