//! Copy-once promotion of private buffers into shared memory

use std::sync::Arc;

use log::debug;

use crate::{
    array::ArrayView,
    error::Result,
    memory::{MemoryBuffer, SharedSegment, Transition},
};

use super::context::ShareContext;

/// Moves buffers into shared segments, at most once per buffer
#[derive(Debug, Clone)]
pub struct SharedMemoryPromoter {
    ctx: Arc<ShareContext>,
}

impl SharedMemoryPromoter {
    pub fn new(ctx: Arc<ShareContext>) -> Self {
        Self { ctx }
    }

    /// Ensure `buffer` lives in shared memory
    ///
    /// A shared buffer is returned as-is with no copy. Otherwise the bytes are
    /// copied into a new segment and the buffer switches to it in place, so
    /// every existing view keeps working and now reads shared memory.
    /// Concurrent callers on one buffer serialize on its state lock; exactly
    /// one of them copies. Device buffers fail with `PromotionUnsupported`.
    pub fn promote(&self, buffer: &Arc<MemoryBuffer>) -> Result<Transition> {
        let ctx = &self.ctx;
        let transition = buffer.transition_to_shared(|bytes| {
            let mut segment = SharedSegment::create(ctx.config(), bytes.len())?;
            segment.as_mut_slice().copy_from_slice(bytes);
            ctx.table().register(segment.handle(), buffer)?;
            ctx.track_created(segment.handle())?;
            Ok(segment)
        })?;

        if let Transition::Promoted(handle) = &transition {
            ctx.atomic_stats().record_promotion(buffer.len());
            debug!("promoted {} ({} bytes) to {}", buffer.id(), buffer.len(), handle);
        }
        Ok(transition)
    }

    /// Copy `bytes` into a fresh segment that is not tied to any existing buffer
    ///
    /// The segment is registered in the table and tracked for cleanup, but
    /// only stays mapped while the returned buffer is held.
    pub fn share_copy(&self, bytes: &[u8]) -> Result<Arc<MemoryBuffer>> {
        let mut segment = SharedSegment::create(self.ctx.config(), bytes.len())?;
        segment.as_mut_slice().copy_from_slice(bytes);
        let handle = segment.handle().clone();

        let buffer = Arc::new(MemoryBuffer::from_segment(segment));
        self.ctx.table().register(&handle, &buffer)?;
        self.ctx.track_created(&handle)?;
        debug!("copied {} bytes into standalone segment {}", bytes.len(), handle);
        Ok(buffer)
    }

    /// Dense shared copy of `view`, pinned in the context
    ///
    /// Copies of one view of one live source reuse a single segment, which
    /// is rewritten with the view's current bytes on every call. The flag is
    /// true when a new segment was created. The pin lasts until the source
    /// buffer is dropped or [`ShareContext::release_pinned`] runs.
    pub fn share_view_copy(&self, view: &ArrayView) -> Result<(Arc<MemoryBuffer>, bool)> {
        let bytes = view.to_bytes()?;
        let source = view.buffer();
        let key = (source.id(), view.descriptor().clone());

        let (buffer, created) = self
            .ctx
            .pinned_or_insert_with(key, source, || self.share_copy(&bytes))?;
        if !created {
            buffer.with_bytes_mut(|dst| dst.copy_from_slice(&bytes))?;
            debug!("refreshed standalone copy of {} from {}", view.dtype(), source.id());
        }
        Ok((buffer, created))
    }
}
