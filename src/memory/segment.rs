//! Shared memory segment implementation

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, warn};
use memmap2::{MmapMut, MmapOptions};
use nix::{
    fcntl::OFlag,
    sys::{
        mman::{shm_open, shm_unlink},
        stat::Mode,
    },
};

use crate::error::{Result, ShmArrayError};

use super::{
    config::{BackingType, ShareConfig},
    handle::SegmentHandle,
};

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A mapped shared memory segment
#[derive(Debug)]
pub struct SharedSegment {
    handle: SegmentHandle,
    mmap: MmapMut,
    _file: File,
    /// Set when this process created the segment
    creator: bool,
    unlink_on_drop: bool,
}

impl SharedSegment {
    /// Create and map a new, uniquely named segment of `size` bytes
    pub fn create(config: &ShareConfig, size: usize) -> Result<Self> {
        config.validate()?;

        let name = Self::generate_name(&config.name_prefix);
        let map_len = size.max(1);

        let (file, handle_name) = match config.backing_type {
            BackingType::FileBacked => {
                let path = config.segment_dir.join(&name);
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .mode(config.permissions)
                    .open(&path)
                    .map_err(|e| ShmArrayError::from_io(e, "Failed to create segment file"))?;
                (file, path.to_string_lossy().into_owned())
            }
            BackingType::PosixShm => {
                let shm_name = format!("/{}", name);
                let fd = shm_open(
                    shm_name.as_str(),
                    OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                    Mode::from_bits_truncate(config.permissions as libc::mode_t),
                )
                .map_err(|e| ShmArrayError::platform(format!("Failed to create shm object: {}", e)))?;
                (File::from(fd), shm_name)
            }
        };

        file.set_len(map_len as u64)
            .map_err(|e| ShmArrayError::from_io(e, "Failed to set segment size"))?;

        // SAFETY: the file was just created with O_EXCL and sized to map_len.
        let mmap = unsafe {
            MmapOptions::new()
                .len(map_len)
                .map_mut(&file)
                .map_err(|e| ShmArrayError::from_io(e, "Failed to map segment"))?
        };

        let handle = SegmentHandle::new(config.backing_type, handle_name, size as u64);
        debug!("created shared segment {}", handle);

        Ok(Self {
            handle,
            mmap,
            _file: file,
            creator: true,
            unlink_on_drop: config.unlink_on_drop,
        })
    }

    /// Map an existing segment identified by `handle`
    pub fn open(handle: &SegmentHandle) -> Result<Self> {
        let size = handle.len()?;
        let map_len = size.max(1);

        let file = match handle.backing {
            BackingType::FileBacked => OpenOptions::new()
                .read(true)
                .write(true)
                .open(Path::new(&handle.name))
                .map_err(|e| ShmArrayError::handle_map_io(handle.id(), e))?,
            BackingType::PosixShm => {
                let fd = shm_open(handle.name.as_str(), OFlag::O_RDWR, Mode::empty())
                    .map_err(|e| ShmArrayError::handle_map_io(handle.id(), e.into()))?;
                File::from(fd)
            }
        };

        let actual = file
            .metadata()
            .map_err(|e| ShmArrayError::handle_map_io(handle.id(), e))?
            .len();
        if actual < map_len as u64 {
            return Err(ShmArrayError::handle_map(
                handle.id(),
                format!("segment holds {} bytes, handle expects {}", actual, size),
            ));
        }

        // SAFETY: the segment is at least map_len bytes long; concurrent
        // writers in other processes are part of the shared-memory contract.
        let mmap = unsafe {
            MmapOptions::new()
                .len(map_len)
                .map_mut(&file)
                .map_err(|e| ShmArrayError::handle_map_io(handle.id(), e))?
        };

        debug!("mapped shared segment {}", handle);

        Ok(Self {
            handle: handle.clone(),
            mmap,
            _file: file,
            creator: false,
            unlink_on_drop: false,
        })
    }

    /// Remove the segment name; existing mappings stay valid
    pub fn unlink_handle(handle: &SegmentHandle) -> Result<()> {
        match handle.backing {
            BackingType::FileBacked => std::fs::remove_file(&handle.name)
                .map_err(|e| ShmArrayError::from_io(e, "Failed to unlink segment file")),
            BackingType::PosixShm => shm_unlink(handle.name.as_str())
                .map_err(|e| ShmArrayError::platform(format!("Failed to unlink shm object: {}", e))),
        }
    }

    fn generate_name(prefix: &str) -> String {
        let counter = SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        format!("{}_{}_{}_{:08x}", prefix, std::process::id(), counter, nanos)
    }

    pub fn handle(&self) -> &SegmentHandle {
        &self.handle
    }

    /// Logical size in bytes
    pub fn size(&self) -> usize {
        self.handle.size as usize
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..self.size()]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size();
        &mut self.mmap[..size]
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if self.creator && self.unlink_on_drop {
            if let Err(e) = Self::unlink_handle(&self.handle) {
                warn!("failed to unlink segment {}: {}", self.handle, e);
            }
        }
    }
}
