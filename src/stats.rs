//! Sharing statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of sharing activity in one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareStats {
    /// Buffers copied into new shared segments
    pub promotions: u64,
    /// Bytes copied by promotions
    pub bytes_promoted: u64,
    /// Views copied out because promotion or resolution was not possible
    pub fallback_copies: u64,
    /// Bytes copied by fallbacks
    pub fallback_bytes: u64,
    /// Segments created by this process
    pub segments_created: u64,
    /// Foreign segments mapped into this process
    pub segments_mapped: u64,
    /// Rebuilds served from an existing mapping
    pub mapping_cache_hits: u64,
    /// Descriptors produced by the reducer
    pub descriptors_reduced: u64,
    /// Arrays produced by the rebuilder
    pub views_rebuilt: u64,
}

impl ShareStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Fraction of reductions that avoided any copy (0.0 to 1.0)
    pub fn copy_free_rate(&self) -> f64 {
        if self.descriptors_reduced == 0 {
            return 1.0;
        }
        let copies = self.promotions + self.fallback_copies;
        1.0 - (copies.min(self.descriptors_reduced) as f64 / self.descriptors_reduced as f64)
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "ShareStats {{ reduced: {}, promotions: {} ({} bytes), fallbacks: {} ({} bytes), \
             rebuilt: {}, mapped: {}, cache_hits: {}, copy_free: {:.2}% }}",
            self.descriptors_reduced,
            self.promotions,
            self.bytes_promoted,
            self.fallback_copies,
            self.fallback_bytes,
            self.views_rebuilt,
            self.segments_mapped,
            self.mapping_cache_hits,
            self.copy_free_rate() * 100.0
        )
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Thread-safe sharing statistics
#[derive(Debug, Default)]
pub struct AtomicShareStats {
    pub promotions: AtomicU64,
    pub bytes_promoted: AtomicU64,
    pub fallback_copies: AtomicU64,
    pub fallback_bytes: AtomicU64,
    pub segments_created: AtomicU64,
    pub segments_mapped: AtomicU64,
    pub mapping_cache_hits: AtomicU64,
    pub descriptors_reduced: AtomicU64,
    pub views_rebuilt: AtomicU64,
}

impl AtomicShareStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_promotion(&self, bytes: usize) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        self.bytes_promoted.fetch_add(bytes as u64, Ordering::Relaxed);
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, bytes: usize, created_segment: bool) {
        self.fallback_copies.fetch_add(1, Ordering::Relaxed);
        self.fallback_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        if created_segment {
            self.segments_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_mapping(&self) {
        self.segments_mapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.mapping_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reduce(&self) {
        self.descriptors_reduced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild(&self) {
        self.views_rebuilt.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> ShareStats {
        ShareStats {
            promotions: self.promotions.load(Ordering::Relaxed),
            bytes_promoted: self.bytes_promoted.load(Ordering::Relaxed),
            fallback_copies: self.fallback_copies.load(Ordering::Relaxed),
            fallback_bytes: self.fallback_bytes.load(Ordering::Relaxed),
            segments_created: self.segments_created.load(Ordering::Relaxed),
            segments_mapped: self.segments_mapped.load(Ordering::Relaxed),
            mapping_cache_hits: self.mapping_cache_hits.load(Ordering::Relaxed),
            descriptors_reduced: self.descriptors_reduced.load(Ordering::Relaxed),
            views_rebuilt: self.views_rebuilt.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.promotions,
            &self.bytes_promoted,
            &self.fallback_copies,
            &self.fallback_bytes,
            &self.segments_created,
            &self.segments_mapped,
            &self.mapping_cache_hits,
            &self.descriptors_reduced,
            &self.views_rebuilt,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
