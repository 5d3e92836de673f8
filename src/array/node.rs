//! Ownership chain nodes

use std::sync::Arc;

use crate::memory::MemoryBuffer;

use super::descriptor::ArrayDescriptor;

/// One link of an ownership chain
///
/// Chains are built parent-first through `Arc`, so they are finite and
/// acyclic and always end at an [`ArrayNode::Owned`] root. Every descriptor
/// in a chain is expressed against the root's buffer.
#[derive(Debug)]
pub enum ArrayNode {
    /// Allocation root; `descriptor` covers the whole buffer
    Owned {
        buffer: Arc<MemoryBuffer>,
        descriptor: ArrayDescriptor,
    },
    /// Plain strided view derived from `parent`
    View {
        parent: Arc<ArrayNode>,
        descriptor: ArrayDescriptor,
    },
    /// Array-like wrapper that ownership resolution does not look through
    Foreign {
        kind: String,
        parent: Arc<ArrayNode>,
        descriptor: ArrayDescriptor,
    },
}

impl ArrayNode {
    pub fn descriptor(&self) -> &ArrayDescriptor {
        match self {
            ArrayNode::Owned { descriptor, .. }
            | ArrayNode::View { descriptor, .. }
            | ArrayNode::Foreign { descriptor, .. } => descriptor,
        }
    }

    pub fn parent(&self) -> Option<&Arc<ArrayNode>> {
        match self {
            ArrayNode::Owned { .. } => None,
            ArrayNode::View { parent, .. } | ArrayNode::Foreign { parent, .. } => Some(parent),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ArrayNode::Owned { .. } => "owned",
            ArrayNode::View { .. } => "view",
            ArrayNode::Foreign { kind, .. } => kind,
        }
    }

    pub fn is_owning(&self) -> bool {
        matches!(self, ArrayNode::Owned { .. })
    }

    /// Buffer holding this node's bytes
    ///
    /// Byte access always reaches the root, even through foreign nodes.
    pub fn buffer(&self) -> &Arc<MemoryBuffer> {
        let mut node = self;
        loop {
            match node {
                ArrayNode::Owned { buffer, .. } => return buffer,
                ArrayNode::View { parent, .. } | ArrayNode::Foreign { parent, .. } => node = parent.as_ref(),
            }
        }
    }

    /// Number of links between this node and its root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self;
        while let Some(parent) = node.parent() {
            depth += 1;
            node = parent.as_ref();
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DType;

    #[test]
    fn test_chain_walk() {
        let buffer = Arc::new(MemoryBuffer::zeroed(32));
        let root = Arc::new(ArrayNode::Owned {
            buffer: buffer.clone(),
            descriptor: ArrayDescriptor::contiguous(&[4], DType::U64),
        });
        let view = Arc::new(ArrayNode::View {
            parent: root.clone(),
            descriptor: root.descriptor().slice_axis(0, 1, 3).unwrap(),
        });
        let wrapped = ArrayNode::Foreign {
            kind: "memoryview".to_string(),
            parent: view.clone(),
            descriptor: view.descriptor().clone(),
        };

        assert!(root.is_owning());
        assert_eq!(wrapped.depth(), 2);
        assert_eq!(wrapped.kind(), "memoryview");
        assert!(Arc::ptr_eq(wrapped.buffer(), &buffer));
        assert_eq!(wrapped.descriptor().offset, 8);
    }
}
