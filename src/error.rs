//! Error types and handling for shmarray

/// Result type alias for shmarray operations
pub type Result<T> = std::result::Result<T, ShmArrayError>;

/// Error types for array sharing, promotion and rebuilding
#[derive(Debug, thiserror::Error)]
pub enum ShmArrayError {
    /// The ownership chain contains a node the resolver cannot look through
    #[error("View chain unsupported: cannot resolve through {kind} node")]
    ViewChainUnsupported { kind: String },

    /// The buffer's storage cannot be backed by shared memory
    #[error("Promotion unsupported: {storage} storage cannot be placed in shared memory")]
    PromotionUnsupported { storage: String },

    /// A view's byte offset relative to its owner is negative, misaligned or out of bounds
    #[error("Offset computation error: {message}")]
    OffsetComputation { message: String },

    /// A shared segment could not be opened or mapped
    #[error("Handle map failure for {handle}: {message}")]
    HandleMap {
        handle: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// No codec registered for a type tag
    #[error("Codec not found for type tag: {tag}")]
    CodecNotFound { tag: String },

    /// I/O related errors (file operations, mmap, etc.)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Memory allocation or mapping failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Concurrency related errors
    #[error("Concurrency error: {message}")]
    Concurrency { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl ShmArrayError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create a view chain error
    pub fn view_chain_unsupported(kind: impl Into<String>) -> Self {
        Self::ViewChainUnsupported { kind: kind.into() }
    }

    /// Create a promotion error
    pub fn promotion_unsupported(storage: impl Into<String>) -> Self {
        Self::PromotionUnsupported {
            storage: storage.into(),
        }
    }

    /// Create an offset computation error
    pub fn offset(message: impl Into<String>) -> Self {
        Self::OffsetComputation {
            message: message.into(),
        }
    }

    /// Create a handle map error without an underlying I/O cause
    pub fn handle_map(handle: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandleMap {
            handle: handle.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a handle map error from the I/O error that caused it
    pub fn handle_map_io(handle: impl Into<String>, source: std::io::Error) -> Self {
        Self::HandleMap {
            handle: handle.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a codec lookup error
    pub fn codec_not_found(tag: impl Into<String>) -> Self {
        Self::CodecNotFound { tag: tag.into() }
    }

    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a concurrency error
    pub fn concurrency(message: impl Into<String>) -> Self {
        Self::Concurrency {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Whether a plain full-copy transfer is the expected reaction to this error
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::PromotionUnsupported { .. } | Self::ViewChainUnsupported { .. }
        )
    }
}

impl From<std::io::Error> for ShmArrayError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<bincode::Error> for ShmArrayError {
    fn from(err: bincode::Error) -> Self {
        Self::serialization(format!("Bincode error: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for ShmArrayError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::concurrency(format!("lock poisoned: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ShmArrayError::memory("Out of memory");
        assert!(matches!(err, ShmArrayError::Memory { .. }));

        let err = ShmArrayError::offset("negative offset");
        assert!(matches!(err, ShmArrayError::OffsetComputation { .. }));

        let err = ShmArrayError::handle_map("/dev/shm/x", "gone");
        assert!(matches!(err, ShmArrayError::HandleMap { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = ShmArrayError::promotion_unsupported("device:0");
        let display = format!("{}", err);
        assert!(display.contains("Promotion unsupported"));
        assert!(display.contains("device:0"));
    }

    #[test]
    fn test_fallback_eligibility() {
        assert!(ShmArrayError::promotion_unsupported("device:1").is_fallback_eligible());
        assert!(ShmArrayError::view_chain_unsupported("mmap-file").is_fallback_eligible());
        assert!(!ShmArrayError::offset("out of bounds").is_fallback_eligible());
        assert!(!ShmArrayError::handle_map("h", "missing").is_fallback_eligible());
    }

    #[test]
    fn test_poison_maps_to_concurrency() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0u8));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: ShmArrayError = lock.lock().unwrap_err().into();
        assert!(matches!(err, ShmArrayError::Concurrency { .. }));
    }
}
