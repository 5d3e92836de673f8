//! Reduction of arrays to wire descriptors

use std::sync::Arc;

use log::{trace, warn};

use crate::{
    array::{ArrayDescriptor, ArrayView},
    error::{Result, ShmArrayError},
    memory::SegmentHandle,
    wire::{InlineArray, WireArray, WireDescriptor},
};

use super::{
    context::ShareContext,
    promoter::SharedMemoryPromoter,
    resolver::{OwnershipResolver, Resolution},
};

/// Turns arrays into descriptors that reference shared memory
#[derive(Debug, Clone)]
pub struct Reducer {
    ctx: Arc<ShareContext>,
    promoter: SharedMemoryPromoter,
}

impl Reducer {
    pub fn new(ctx: Arc<ShareContext>) -> Self {
        Self {
            promoter: SharedMemoryPromoter::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<ShareContext> {
        &self.ctx
    }

    pub fn promoter(&self) -> &SharedMemoryPromoter {
        &self.promoter
    }

    /// Describe `view` relative to its owner's shared segment
    ///
    /// The owner is promoted on first use; later views of the same owner
    /// cost no copy. A chain holding an unsupported node is copied into a
    /// standalone segment instead, unless the context disables that.
    /// Device-resident owners fail with `PromotionUnsupported`.
    pub fn reduce(&self, view: &ArrayView) -> Result<WireDescriptor> {
        let wire = match OwnershipResolver::resolve(view.node()) {
            Resolution::Owner { node, buffer, .. } => {
                let handle = match buffer.shared_handle()? {
                    Some(handle) => handle,
                    None => self.promoter.promote(buffer)?.into_handle(),
                };
                let descriptor = relative_descriptor(view.descriptor(), node.descriptor(), &handle)?;
                WireDescriptor::new(handle, &descriptor)?
            }
            Resolution::Unsupported { kind, depth, .. } => {
                if !self.ctx.config().fallback_on_unsupported_chain {
                    return Err(ShmArrayError::view_chain_unsupported(kind));
                }
                warn!(
                    "ownership chain stops at {} node after {} links; copying view",
                    kind, depth
                );
                self.reduce_by_copy(view)?
            }
        };

        self.ctx.atomic_stats().record_reduce();
        trace!(
            "reduced {:?} view at offset {} of {}",
            wire.shape,
            wire.offset,
            wire.owner
        );
        Ok(wire)
    }

    /// Like [`Reducer::reduce`], but degrade to an inline copy when sharing is impossible
    pub fn reduce_or_copy(&self, view: &ArrayView) -> Result<WireArray> {
        match self.reduce(view) {
            Ok(descriptor) => Ok(WireArray::Shared(descriptor)),
            Err(err) if err.is_fallback_eligible() => {
                warn!("falling back to inline copy: {}", err);
                let inline = InlineArray::from_view(view)?;
                self.ctx
                    .atomic_stats()
                    .record_fallback(inline.bytes.len(), false);
                Ok(WireArray::Inline(inline))
            }
            Err(err) => Err(err),
        }
    }

    fn reduce_by_copy(&self, view: &ArrayView) -> Result<WireDescriptor> {
        let (buffer, created) = self.promoter.share_view_copy(view)?;
        self.ctx.atomic_stats().record_fallback(buffer.len(), created);

        let handle = buffer.shared_handle()?.ok_or_else(|| {
            ShmArrayError::memory("standalone segment buffer is not shared")
        })?;
        let descriptor = ArrayDescriptor::contiguous(view.shape(), view.dtype());
        WireDescriptor::new(handle, &descriptor)
    }
}

/// Re-express `view` against the start of `owner`'s buffer
fn relative_descriptor(
    view: &ArrayDescriptor,
    owner: &ArrayDescriptor,
    handle: &SegmentHandle,
) -> Result<ArrayDescriptor> {
    let offset = view.offset.checked_sub(owner.offset).ok_or_else(|| {
        ShmArrayError::offset(format!(
            "view starts at byte {} before its owner at byte {}",
            view.offset, owner.offset
        ))
    })?;

    let itemsize = view.itemsize();
    if itemsize > 0 && offset % itemsize != 0 {
        return Err(ShmArrayError::offset(format!(
            "offset {} is not a whole number of {} elements",
            offset, view.dtype
        )));
    }

    let descriptor = view.with_offset(offset);
    descriptor.validate(handle.len()?)?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        array::DType,
        memory::{BackingType, ShareConfig},
    };
    use tempfile::TempDir;

    fn reducer(dir: &TempDir) -> Reducer {
        Reducer::new(ShareContext::new(ShareConfig::new(dir.path())).unwrap())
    }

    #[test]
    fn test_first_reduce_promotes_owner() {
        let dir = TempDir::new().unwrap();
        let reducer = reducer(&dir);
        let base = ArrayView::from_vec((0..40).map(|v| v as f32).collect(), &[10, 4]).unwrap();
        let view = base.slice(0, 5..10).unwrap();

        let wire = reducer.reduce(&view).unwrap();
        assert!(base.is_shared());
        assert_eq!(wire.offset, 80);
        assert_eq!(wire.shape, vec![5, 4]);
        assert_eq!(wire.owner.size, 160);
        assert_eq!(reducer.context().stats().promotions, 1);
    }

    #[test]
    fn test_views_of_one_owner_share_handle() {
        let dir = TempDir::new().unwrap();
        let reducer = reducer(&dir);
        let base = ArrayView::zeros(&[8, 8], DType::I16).unwrap();

        let a = reducer.reduce(&base.slice(0, 0..4).unwrap()).unwrap();
        let b = reducer.reduce(&base.slice(0, 4..8).unwrap().transpose()).unwrap();
        assert_eq!(a.owner, b.owner);
        assert_eq!(b.strides, vec![2, 16]);

        let stats = reducer.context().stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.descriptors_reduced, 2);
    }

    #[test]
    fn test_relative_descriptor_rejects_bad_offsets() {
        let handle = SegmentHandle::new(BackingType::FileBacked, "/x", 64);
        let owner = ArrayDescriptor::contiguous(&[8], DType::F64);

        let before = ArrayDescriptor::contiguous(&[2], DType::F64).with_offset(0);
        assert!(relative_descriptor(&before, &owner.with_offset(8), &handle).is_err());

        let misaligned = ArrayDescriptor::contiguous(&[2], DType::F64).with_offset(4);
        assert!(matches!(
            relative_descriptor(&misaligned, &owner, &handle),
            Err(ShmArrayError::OffsetComputation { .. })
        ));

        let past_end = ArrayDescriptor::contiguous(&[2], DType::F64).with_offset(56);
        assert!(relative_descriptor(&past_end, &owner, &handle).is_err());
    }

    #[test]
    fn test_device_owner_not_reducible() {
        let dir = TempDir::new().unwrap();
        let reducer = reducer(&dir);
        let array = ArrayView::from_vec_on_device(vec![1i32, 2, 3], &[3], 0).unwrap();

        assert!(matches!(
            reducer.reduce(&array),
            Err(ShmArrayError::PromotionUnsupported { .. })
        ));
        let wire = reducer.reduce_or_copy(&array).unwrap();
        assert!(!wire.is_shared());
        assert_eq!(reducer.context().stats().fallback_copies, 1);
    }

    #[test]
    fn test_foreign_chain_policy() {
        let dir = TempDir::new().unwrap();
        let base = ArrayView::from_vec((0..16i64).collect(), &[4, 4]).unwrap();
        let view = base.wrap_foreign("memmap").slice(0, 1..3).unwrap();

        let strict = Reducer::new(
            ShareContext::new(
                ShareConfig::new(dir.path()).with_fallback_on_unsupported_chain(false),
            )
            .unwrap(),
        );
        assert!(matches!(
            strict.reduce(&view),
            Err(ShmArrayError::ViewChainUnsupported { .. })
        ));

        let lenient = reducer(&dir);
        let wire = lenient.reduce(&view).unwrap();
        assert_eq!(wire.offset, 0);
        assert_eq!(wire.strides, vec![32, 8]);
        assert_eq!(wire.owner.size, 64);
        assert!(!base.is_shared());
        assert_eq!(lenient.context().stats().fallback_copies, 1);
    }

    #[test]
    fn test_repeated_foreign_reduce_reuses_segment() {
        let dir = TempDir::new().unwrap();
        let reducer = reducer(&dir);
        let base = ArrayView::from_vec((0..12u32).collect(), &[3, 4]).unwrap();
        let view = base.wrap_foreign("memmap").transpose();

        let first = reducer.reduce(&view).unwrap();
        let second = reducer.reduce(&view).unwrap();
        assert_eq!(first.owner, second.owner);

        let ctx = reducer.context();
        let stats = ctx.stats();
        assert_eq!(stats.segments_created, 1);
        assert_eq!(stats.fallback_copies, 2);
        assert_eq!(ctx.pinned_count().unwrap(), 1);

        // a different view of the same source gets its own copy
        let other = reducer.reduce(&view.flip(0).unwrap()).unwrap();
        assert_ne!(other.owner, first.owner);
        assert_eq!(ctx.pinned_count().unwrap(), 2);

        drop(view);
        drop(base);
        let fresh = ArrayView::from_vec(vec![1u8], &[1]).unwrap().wrap_foreign("memmap");
        reducer.reduce(&fresh).unwrap();
        assert_eq!(ctx.pinned_count().unwrap(), 1);
    }
}
