//! Configuration types for shared memory segments

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackingType {
    /// File in a (preferably tmpfs) directory, opened by absolute path
    FileBacked,
    /// POSIX shared memory object, opened by `shm_open` name
    PosixShm,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::FileBacked
    }
}

impl BackingType {
    /// Check if this backing type is supported on the current platform
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::FileBacked => true,
            BackingType::PosixShm => cfg!(unix),
        }
    }

    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            BackingType::PosixShm => "posix-shm",
        }
    }
}

/// Configuration shared by the reducer and rebuilder of one process
#[derive(Debug, Clone, PartialEq)]
pub struct ShareConfig {
    /// Backing used for newly promoted segments
    pub backing_type: BackingType,
    /// Directory holding file-backed segments
    pub segment_dir: PathBuf,
    /// Prefix of generated segment names
    pub name_prefix: String,
    /// Permissions for created segments (Unix permissions)
    pub permissions: u32,
    /// Unlink the segment name when the promoting process drops its mapping
    pub unlink_on_drop: bool,
    /// Unlink every segment the context created when the context drops
    pub cleanup_on_drop: bool,
    /// Copy instead of failing when a view chain holds an unsupported node
    pub fallback_on_unsupported_chain: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            backing_type: BackingType::default(),
            segment_dir: Self::default_segment_dir(),
            name_prefix: crate::config::DEFAULT_NAME_PREFIX.to_string(),
            permissions: crate::config::DEFAULT_PERMISSIONS,
            unlink_on_drop: false,
            cleanup_on_drop: false,
            fallback_on_unsupported_chain: true,
        }
    }
}

impl ShareConfig {
    /// Create a configuration placing file-backed segments in `segment_dir`
    pub fn new(segment_dir: impl Into<PathBuf>) -> Self {
        Self {
            segment_dir: segment_dir.into(),
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the segment directory
    pub fn with_segment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segment_dir = dir.into();
        self
    }

    /// Set the segment name prefix
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the permissions for created segments
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set whether the creator unlinks segments when its mapping drops
    pub fn with_unlink_on_drop(mut self, unlink: bool) -> Self {
        self.unlink_on_drop = unlink;
        self
    }

    /// Set whether dropping the context unlinks the segments it created
    pub fn with_cleanup_on_drop(mut self, cleanup: bool) -> Self {
        self.cleanup_on_drop = cleanup;
        self
    }

    /// Set whether unsupported chain nodes fall back to a full copy
    pub fn with_fallback_on_unsupported_chain(mut self, fallback: bool) -> Self {
        self.fallback_on_unsupported_chain = fallback;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ShmArrayError;

        if self.name_prefix.is_empty() {
            return Err(ShmArrayError::invalid_parameter(
                "name_prefix",
                "Segment name prefix cannot be empty",
            ));
        }

        if self.name_prefix.contains('/') || self.name_prefix.contains('\0') {
            return Err(ShmArrayError::invalid_parameter(
                "name_prefix",
                "Segment name prefix cannot contain '/' or NUL",
            ));
        }

        if !self.backing_type.is_supported() {
            return Err(ShmArrayError::invalid_parameter(
                "backing_type",
                format!(
                    "Backing type {} is not supported on this platform",
                    self.backing_type.name()
                ),
            ));
        }

        if self.backing_type == BackingType::FileBacked && !self.segment_dir.is_absolute() {
            return Err(ShmArrayError::invalid_parameter(
                "segment_dir",
                "Segment directory must be an absolute path",
            ));
        }

        Ok(())
    }

    /// Directory used when none is configured: tmpfs if present, else the temp dir
    pub fn default_segment_dir() -> PathBuf {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    }
}
