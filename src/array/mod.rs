//! Multidimensional arrays, their layouts and ownership chains

pub mod descriptor;
pub mod dtype;
pub mod node;
pub mod view;

pub use descriptor::{checked_numel, row_major_strides, ArrayDescriptor};
pub use dtype::{DType, Element};
pub use node::ArrayNode;
pub use view::ArrayView;
