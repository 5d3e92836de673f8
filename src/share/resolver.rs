//! Ownership resolution

use std::sync::Arc;

use crate::{
    array::ArrayNode,
    error::{Result, ShmArrayError},
    memory::MemoryBuffer,
};

/// Terminal node reached by walking an ownership chain
#[derive(Debug)]
pub enum Resolution<'a> {
    /// The chain ends at its allocation root
    Owner {
        node: &'a ArrayNode,
        buffer: &'a Arc<MemoryBuffer>,
        depth: usize,
    },
    /// The walk stopped at a node it cannot look through
    Unsupported {
        node: &'a ArrayNode,
        kind: &'a str,
        depth: usize,
    },
}

impl<'a> Resolution<'a> {
    pub fn node(&self) -> &'a ArrayNode {
        match *self {
            Resolution::Owner { node, .. } | Resolution::Unsupported { node, .. } => node,
        }
    }

    /// Links walked from the starting node
    pub fn depth(&self) -> usize {
        match *self {
            Resolution::Owner { depth, .. } | Resolution::Unsupported { depth, .. } => depth,
        }
    }

    /// The owning buffer, or `ViewChainUnsupported`
    pub fn owner(&self) -> Result<&'a Arc<MemoryBuffer>> {
        match *self {
            Resolution::Owner { buffer, .. } => Ok(buffer),
            Resolution::Unsupported { kind, .. } => Err(ShmArrayError::view_chain_unsupported(kind)),
        }
    }
}

/// Walks `derived-from` links to the node that owns a view's memory
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipResolver;

impl OwnershipResolver {
    /// Follow plain views upwards until an owning or foreign node
    ///
    /// Only owning roots hold buffers, so a root that has already been
    /// promoted is also where the walk stops; it never goes past a shared
    /// boundary. Foreign nodes end the walk even though they are not roots.
    pub fn resolve(start: &ArrayNode) -> Resolution<'_> {
        let mut node = start;
        let mut depth = 0;
        loop {
            match node {
                ArrayNode::Owned { buffer, .. } => {
                    return Resolution::Owner {
                        node,
                        buffer,
                        depth,
                    }
                }
                ArrayNode::Foreign { kind, .. } => {
                    return Resolution::Unsupported {
                        node,
                        kind: kind.as_str(),
                        depth,
                    }
                }
                ArrayNode::View { parent, .. } => {
                    node = parent.as_ref();
                    depth += 1;
                }
            }
        }
    }
}
