//! Concurrency tests for promotion and mapping under contention
//! Threads are released together through a barrier to maximise overlap

use std::{
    collections::HashSet,
    sync::{Arc, Barrier},
    thread,
};

use shmarray::{ArrayView, Rebuilder, Reducer, ShareConfig, ShareContext, WireDescriptor};
use tempfile::TempDir;

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    const THREADS: usize = 8;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Threads racing to send disjoint rows of one unshared owner
    #[test]
    fn stress_concurrent_promotion_of_one_buffer() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let ctx = ShareContext::new(ShareConfig::new(temp_dir.path())).unwrap();
        let reducer = Arc::new(Reducer::new(ctx.clone()));
        let base = ArrayView::from_vec((0..THREADS as u64 * 64).collect(), &[THREADS, 64]).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let mut handles = Vec::new();
        for row in 0..THREADS {
            let reducer = reducer.clone();
            let barrier = barrier.clone();
            let view = base.index_axis(0, row).unwrap();

            handles.push(thread::spawn(move || {
                barrier.wait();
                reducer.reduce(&view).unwrap()
            }));
        }

        let wires: Vec<WireDescriptor> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let owners: HashSet<String> = wires.iter().map(|w| w.owner.id()).collect();
        assert_eq!(owners.len(), 1, "all rows must share one segment");

        let offsets: HashSet<u64> = wires.iter().map(|w| w.offset).collect();
        assert_eq!(offsets.len(), THREADS);

        let stats = ctx.stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.segments_created, 1);
        assert_eq!(stats.descriptors_reduced, THREADS as u64);
        assert_eq!(ctx.table().len(), 1);
    }

    /// Threads rebuilding descriptors of one segment in a fresh receiver
    #[test]
    fn stress_concurrent_rebuild_maps_once() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let config = ShareConfig::new(temp_dir.path());
        let reducer = Reducer::new(ShareContext::new(config.clone()).unwrap());
        let receiver = ShareContext::new(config).unwrap();
        let rebuilder = Arc::new(Rebuilder::new(receiver.clone()));

        let base = ArrayView::from_vec((0..THREADS as i32 * 16).collect(), &[THREADS, 16]).unwrap();
        let wires: Vec<WireDescriptor> = (0..THREADS)
            .map(|row| reducer.reduce(&base.index_axis(0, row).unwrap()).unwrap())
            .collect();
        let barrier = Arc::new(Barrier::new(THREADS));

        let mut handles = Vec::new();
        for (row, wire) in wires.into_iter().enumerate() {
            let rebuilder = rebuilder.clone();
            let barrier = barrier.clone();

            handles.push(thread::spawn(move || {
                barrier.wait();
                let view = rebuilder.rebuild(&wire).unwrap();
                let expected: Vec<i32> = (row as i32 * 16..(row as i32 + 1) * 16).collect();
                assert_eq!(view.to_vec::<i32>().unwrap(), expected);
                view
            }));
        }

        let views: Vec<ArrayView> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(views.windows(2).all(|pair| pair[0].shares_buffer_with(&pair[1])));

        let stats = receiver.stats();
        assert_eq!(stats.segments_mapped, 1);
        assert_eq!(stats.mapping_cache_hits, THREADS as u64 - 1);
        assert_eq!(stats.views_rebuilt, THREADS as u64);
    }

    /// Independent owners promoted concurrently never collide
    #[test]
    fn stress_concurrent_distinct_owners() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let ctx = ShareContext::new(ShareConfig::new(temp_dir.path())).unwrap();
        let reducer = Arc::new(Reducer::new(ctx.clone()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let mut handles = Vec::new();
        for id in 0..THREADS {
            let reducer = reducer.clone();
            let barrier = barrier.clone();

            handles.push(thread::spawn(move || {
                let array = ArrayView::from_vec(vec![id as f32; 32], &[32]).unwrap();
                barrier.wait();
                let wire = reducer.reduce(&array).unwrap();
                (wire, array)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let owners: HashSet<String> = results.iter().map(|(w, _)| w.owner.id()).collect();
        assert_eq!(owners.len(), THREADS);
        assert_eq!(ctx.stats().promotions, THREADS as u64);
        assert_eq!(ctx.table().live_count().unwrap(), THREADS);
    }
}
