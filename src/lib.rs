//! # shmarray - Zero-copy array sharing across processes
//!
//! shmarray moves n-dimensional arrays and strided views between processes
//! without re-copying their bytes on every transfer. The first time any view
//! of an owning buffer is sent, that buffer is promoted into an OS shared
//! memory segment (one copy). From then on every view of the same owner is
//! sent as a small descriptor of offset, shape, strides and dtype relative to
//! the shared segment, and the receiver maps the segment and views it in place.
//!
//! ## Architecture
//!
//! ```text
//!  sender                                      receiver
//! ┌───────────────────────┐                 ┌────────────────────────┐
//! │ ArrayView             │                 │ Rebuilder              │
//! │   │ OwnershipResolver │   Envelope      │   │ SegmentTable       │
//! │   ▼                   │  (bincode)      │   ▼  (map once)        │
//! │ Reducer ── Promoter ──┼───────────────▶ │ ArrayView over segment │
//! └───────────┬───────────┘                 └───────────┬────────────┘
//!             │        shared segment (memmap2)         │
//!             └─────────────────────────────────────────┘
//! ```
//!
//! The [`registry::TypeRegistry`] is the hook a transport calls to encode and
//! decode objects by type tag.

pub mod array;
pub mod error;
pub mod memory;
pub mod registry;
pub mod share;
pub mod stats;
pub mod wire;

pub use array::{ArrayDescriptor, ArrayNode, ArrayView, DType, Element};
pub use error::{Result, ShmArrayError};
pub use memory::{
    BackingType, MemoryBuffer, SegmentHandle, SegmentTable, ShareConfig, SharedSegment,
    SharingState, StorageKind,
};
pub use registry::{Codec, TypeRegistry, ARRAY_TAG};
pub use share::{OwnershipResolver, Rebuilder, Reducer, ShareContext, SharedMemoryPromoter};
pub use stats::{AtomicShareStats, ShareStats};
pub use wire::{Envelope, InlineArray, WireArray, WireDescriptor};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Prefix of generated segment names
    pub const DEFAULT_NAME_PREFIX: &str = "shmarray";

    /// Permissions of newly created segments
    pub const DEFAULT_PERMISSIONS: u32 = 0o600;

    /// Type tag of the built-in array codec
    pub const DEFAULT_ARRAY_TAG: &str = crate::registry::ARRAY_TAG;
}
