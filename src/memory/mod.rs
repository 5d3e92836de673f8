//! Shared memory segments and the buffers they back

pub mod buffer;
pub mod config;
pub mod handle;
pub mod segment;
pub mod table;

pub use buffer::{BufferId, MemoryBuffer, SharingState, StorageKind, Transition};
pub use config::{BackingType, ShareConfig};
pub use handle::SegmentHandle;
pub use segment::SharedSegment;
pub use table::SegmentTable;
