//! Reconstruction of arrays from wire descriptors

use std::sync::Arc;

use log::{debug, trace};

use crate::{
    array::ArrayView,
    error::{Result, ShmArrayError},
    memory::{MemoryBuffer, SegmentHandle, SharedSegment},
    wire::{WireArray, WireDescriptor},
};

use super::context::ShareContext;

/// Maps shared segments and builds zero-copy views over them
#[derive(Debug, Clone)]
pub struct Rebuilder {
    ctx: Arc<ShareContext>,
}

impl Rebuilder {
    pub fn new(ctx: Arc<ShareContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ShareContext> {
        &self.ctx
    }

    /// View the bytes `wire` describes without copying them
    ///
    /// Descriptors naming a segment this process already holds reuse that
    /// buffer, so views rebuilt from one owner alias the same memory.
    pub fn rebuild(&self, wire: &WireDescriptor) -> Result<ArrayView> {
        let descriptor = wire.to_array_descriptor()?;
        let buffer = self.map_owner(&wire.owner)?;
        let view = ArrayView::over_buffer(buffer, descriptor)?;

        self.ctx.atomic_stats().record_rebuild();
        trace!(
            "rebuilt {:?} {} view at offset {} of {}",
            wire.shape,
            wire.dtype,
            wire.offset,
            wire.owner
        );
        Ok(view)
    }

    /// Rebuild either wire form; inline payloads become private arrays
    pub fn rebuild_any(&self, wire: &WireArray) -> Result<ArrayView> {
        match wire {
            WireArray::Shared(descriptor) => self.rebuild(descriptor),
            WireArray::Inline(inline) => {
                let view = inline.clone().into_array()?;
                self.ctx.atomic_stats().record_rebuild();
                Ok(view)
            }
        }
    }

    /// Forget table entries for segments no local array uses anymore
    pub fn purge_stale(&self) -> Result<usize> {
        let purged = self.ctx.table().purge_stale()?;
        if purged > 0 {
            debug!("purged {} stale segment entries", purged);
        }
        Ok(purged)
    }

    /// Number of segments currently mapped by live arrays
    pub fn mapped_segments(&self) -> Result<usize> {
        self.ctx.table().live_count()
    }

    fn map_owner(&self, handle: &SegmentHandle) -> Result<Arc<MemoryBuffer>> {
        let (buffer, mapped) = self.ctx.table().get_or_try_insert_with(handle, || {
            let segment = SharedSegment::open(handle)?;
            Ok(Arc::new(MemoryBuffer::from_segment(segment)))
        })?;

        if buffer.len() as u64 != handle.size {
            return Err(ShmArrayError::handle_map(
                handle.id(),
                format!(
                    "local buffer holds {} bytes, handle expects {}",
                    buffer.len(),
                    handle.size
                ),
            ));
        }

        if mapped {
            self.ctx.atomic_stats().record_mapping();
        } else {
            self.ctx.atomic_stats().record_cache_hit();
            debug!("reusing mapping of {}", handle);
        }
        Ok(buffer)
    }
}
