//! Per-process sharing state

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use log::{debug, warn};

use crate::{
    array::ArrayDescriptor,
    error::Result,
    memory::{BufferId, MemoryBuffer, SegmentHandle, SegmentTable, ShareConfig, SharedSegment},
    stats::{AtomicShareStats, ShareStats},
};

/// Identity of a compacted copy: the root buffer it was read from and the
/// layout of the copied view inside that buffer
pub(crate) type CopyKey = (BufferId, ArrayDescriptor);

/// A standalone segment holding a dense copy of one view
#[derive(Debug)]
struct PinnedCopy {
    source: Weak<MemoryBuffer>,
    buffer: Arc<MemoryBuffer>,
}

/// State shared by the reducer and rebuilder of one process
///
/// Build one at startup and hand out clones of the `Arc`; nothing in the
/// crate keeps hidden global tables.
#[derive(Debug)]
pub struct ShareContext {
    config: ShareConfig,
    table: SegmentTable,
    /// Fallback copies kept mapped while their source is alive, until released
    pinned: Mutex<HashMap<CopyKey, PinnedCopy>>,
    /// Names of segments this process created and has not unlinked
    created: Mutex<HashMap<String, SegmentHandle>>,
    stats: AtomicShareStats,
}

impl ShareContext {
    pub fn new(config: ShareConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            table: SegmentTable::new(),
            pinned: Mutex::new(HashMap::new()),
            created: Mutex::new(HashMap::new()),
            stats: AtomicShareStats::new(),
        }))
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    /// Segments this process created or mapped
    pub fn table(&self) -> &SegmentTable {
        &self.table
    }

    pub fn stats(&self) -> ShareStats {
        self.stats.snapshot()
    }

    pub(crate) fn atomic_stats(&self) -> &AtomicShareStats {
        &self.stats
    }

    pub(crate) fn track_created(&self, handle: &SegmentHandle) -> Result<()> {
        self.created.lock()?.insert(handle.id(), handle.clone());
        Ok(())
    }

    /// Pinned copy for `key`, or one made by `create` and pinned
    ///
    /// The flag is true when `create` ran. Copies whose source buffer is
    /// gone are evicted first. `create` runs with the pin lock held.
    pub(crate) fn pinned_or_insert_with<F>(
        &self,
        key: CopyKey,
        source: &Arc<MemoryBuffer>,
        create: F,
    ) -> Result<(Arc<MemoryBuffer>, bool)>
    where
        F: FnOnce() -> Result<Arc<MemoryBuffer>>,
    {
        let mut pinned = self.pinned.lock()?;
        let before = pinned.len();
        pinned.retain(|_, copy| copy.source.strong_count() > 0);
        if pinned.len() < before {
            debug!("evicted {} copies of dropped buffers", before - pinned.len());
        }

        if let Some(copy) = pinned.get(&key) {
            return Ok((Arc::clone(&copy.buffer), false));
        }

        let buffer = create()?;
        pinned.insert(
            key,
            PinnedCopy {
                source: Arc::downgrade(source),
                buffer: Arc::clone(&buffer),
            },
        );
        Ok((buffer, true))
    }

    pub fn pinned_count(&self) -> Result<usize> {
        Ok(self.pinned.lock()?.len())
    }

    /// Drop this process's hold on fallback segments; returns how many were released
    pub fn release_pinned(&self) -> Result<usize> {
        let released = std::mem::take(&mut *self.pinned.lock()?);
        debug!("released {} pinned fallback segments", released.len());
        Ok(released.len())
    }

    /// Handles of segments created here whose names still exist
    pub fn created_segments(&self) -> Result<Vec<SegmentHandle>> {
        let mut handles: Vec<SegmentHandle> = self.created.lock()?.values().cloned().collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(handles)
    }

    /// Remove a segment name so no further process can map it
    ///
    /// Existing mappings, here or elsewhere, remain valid until dropped.
    pub fn unlink(&self, handle: &SegmentHandle) -> Result<()> {
        SharedSegment::unlink_handle(handle)?;
        self.created.lock()?.remove(&handle.id());
        self.table.remove(handle)?;
        debug!("unlinked segment {}", handle);
        Ok(())
    }

    /// Unlink every segment name this process created; returns how many went
    ///
    /// Mapped arrays keep working. Names that already vanished are skipped
    /// with a warning.
    pub fn cleanup(&self) -> Result<usize> {
        let created = std::mem::take(&mut *self.created.lock()?);
        let mut unlinked = 0;
        for handle in created.values() {
            match SharedSegment::unlink_handle(handle) {
                Ok(()) => unlinked += 1,
                Err(e) => warn!("failed to unlink segment {}: {}", handle, e),
            }
        }
        if unlinked > 0 {
            debug!("cleaned up {} created segments", unlinked);
        }
        Ok(unlinked)
    }

    /// Stop tracking created segments so they outlive this context
    ///
    /// Receivers can still map the returned handles after this process is
    /// gone; whoever holds them is responsible for unlinking.
    pub fn detach(&self) -> Result<Vec<SegmentHandle>> {
        let created = std::mem::take(&mut *self.created.lock()?);
        Ok(created.into_values().collect())
    }
}

impl Drop for ShareContext {
    fn drop(&mut self) {
        if !self.config.cleanup_on_drop {
            return;
        }
        if let Err(e) = self.cleanup() {
            warn!("segment cleanup failed: {}", e);
        }
    }
}
