//! Reduce/rebuild services for sharing arrays between processes
//!
//! The sending side resolves a view to its owning buffer, promotes that
//! buffer into shared memory once, and emits a descriptor relative to it.
//! The receiving side maps the named segment and rebuilds a view over it.

pub mod context;
pub mod promoter;
pub mod rebuilder;
pub mod reducer;
pub mod resolver;

pub use context::ShareContext;
pub use promoter::SharedMemoryPromoter;
pub use rebuilder::Rebuilder;
pub use reducer::Reducer;
pub use resolver::{OwnershipResolver, Resolution};
