//! Integration tests for memory management components

use std::sync::Arc;

use shmarray::{
    memory::Transition, BackingType, MemoryBuffer, SegmentTable, ShareConfig,
    ShareContext, SharedMemoryPromoter, SharedSegment, SharingState, StorageKind,
};
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_config_default() {
        let config = ShareConfig::default();
        assert_eq!(config.backing_type, BackingType::FileBacked);
        assert_eq!(config.name_prefix, "shmarray");
        assert_eq!(config.permissions, 0o600);
        assert!(!config.unlink_on_drop);
        assert!(config.fallback_on_unsupported_chain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_share_config_builder() {
        let temp_dir = TempDir::new().unwrap();
        let config = ShareConfig::new(temp_dir.path())
            .with_name_prefix("frames")
            .with_permissions(0o644)
            .with_unlink_on_drop(true)
            .with_fallback_on_unsupported_chain(false);

        assert_eq!(config.segment_dir, temp_dir.path());
        assert_eq!(config.name_prefix, "frames");
        assert_eq!(config.permissions, 0o644);
        assert!(config.unlink_on_drop);
        assert!(!config.fallback_on_unsupported_chain);
    }

    #[test]
    fn test_share_config_validation() {
        let mut config = ShareConfig::default();

        // Empty prefix should fail
        config.name_prefix = String::new();
        assert!(config.validate().is_err());

        // Path separators are not allowed in names
        config.name_prefix = "a/b".to_string();
        assert!(config.validate().is_err());

        config.name_prefix = "ok".to_string();
        config.segment_dir = "relative/dir".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_create_file_backed_segment() {
        let temp_dir = TempDir::new().unwrap();
        let config = ShareConfig::new(temp_dir.path()).with_name_prefix("seg");

        let segment = SharedSegment::create(&config, 4096).unwrap();
        let handle = segment.handle();
        assert_eq!(handle.backing, BackingType::FileBacked);
        assert_eq!(handle.size, 4096);
        assert!(handle.name.starts_with(temp_dir.path().to_str().unwrap()));
        assert!(handle.id().starts_with("file-backed:"));
        assert!(segment.is_creator());
    }

    #[test]
    fn test_buffer_promotion_transition() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ShareContext::new(ShareConfig::new(temp_dir.path())).unwrap();
        let promoter = SharedMemoryPromoter::new(ctx.clone());
        let buffer = Arc::new(MemoryBuffer::from_bytes(vec![1, 2, 3, 4, 5]));
        assert_eq!(buffer.sharing_state().unwrap(), SharingState::Private);
        assert_eq!(buffer.storage(), StorageKind::Host);

        let transition = promoter.promote(&buffer).unwrap();
        assert!(matches!(transition, Transition::Promoted(_)));
        let handle = transition.into_handle();
        assert_eq!(
            buffer.sharing_state().unwrap(),
            SharingState::Shared(handle.clone())
        );

        // Writes through the buffer land in the segment
        buffer.write(0, &[42]).unwrap();
        let reopened = SharedSegment::open(&handle).unwrap();
        assert_eq!(reopened.as_slice(), &[42, 2, 3, 4, 5]);
    }

    #[test]
    fn test_buffer_bounds() {
        let buffer = MemoryBuffer::zeroed(8);
        assert!(buffer.write(6, &[1, 2]).is_ok());
        assert!(buffer.write(7, &[1, 2]).is_err());
        assert_eq!(buffer.read(6, 2).unwrap(), vec![1, 2]);
        assert!(buffer.read(0, 9).is_err());
    }

    #[test]
    fn test_segment_table_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let config = ShareConfig::new(temp_dir.path());
        let table = SegmentTable::new();

        let segment = SharedSegment::create(&config, 32).unwrap();
        let handle = segment.handle().clone();
        let buffer = Arc::new(MemoryBuffer::from_segment(segment));
        table.register(&handle, &buffer).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.total_live_bytes().unwrap(), 32);
        assert_eq!(table.list().unwrap(), vec![handle.id()]);

        let (again, created) = table
            .get_or_try_insert_with(&handle, || panic!("must reuse the live buffer"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&again, &buffer));

        drop(again);
        drop(buffer);
        assert_eq!(table.live_count().unwrap(), 0);
        assert_eq!(table.purge_stale().unwrap(), 1);
        assert!(table.is_empty());
    }
}
