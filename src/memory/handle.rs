//! Process-portable identifiers for shared segments

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::BackingType;

/// Identifies a shared segment so that another process can map the same memory
///
/// For file-backed segments `name` is an absolute path, for POSIX shared memory
/// it is the `shm_open` object name. `size` is the logical byte length, which
/// may be smaller than the mapped length (empty buffers still map one byte).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHandle {
    pub backing: BackingType,
    pub name: String,
    pub size: u64,
}

impl SegmentHandle {
    pub fn new(backing: BackingType, name: impl Into<String>, size: u64) -> Self {
        Self {
            backing,
            name: name.into(),
            size,
        }
    }

    /// Key used by segment tables; unique per segment on one host
    pub fn id(&self) -> String {
        format!("{}:{}", self.backing.name(), self.name)
    }

    /// Logical size as a host `usize`
    pub fn len(&self) -> crate::Result<usize> {
        usize::try_from(self.size).map_err(|_| {
            crate::error::ShmArrayError::handle_map(
                self.id(),
                format!("segment size {} exceeds the address space", self.size),
            )
        })
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.id(), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_id_includes_backing() {
        let file = SegmentHandle::new(BackingType::FileBacked, "/dev/shm/a", 16);
        let shm = SegmentHandle::new(BackingType::PosixShm, "/dev/shm/a", 16);
        assert_ne!(file.id(), shm.id());
        assert_eq!(file.len().unwrap(), 16);
    }

    #[test]
    fn test_handle_serializes() {
        let handle = SegmentHandle::new(BackingType::PosixShm, "/shmarray_1_2", 4096);
        let bytes = bincode::serialize(&handle).unwrap();
        let decoded: SegmentHandle = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, handle);
        assert_eq!(decoded.to_string(), "posix-shm:/shmarray_1_2 (4096 bytes)");
    }
}
