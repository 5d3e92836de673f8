//! Type-tag registry of reduce/rebuild codecs
//!
//! A transport that delegates object encoding to a hook looks up the codec
//! for an object's tag, reduces it to a [`WireArray`] and ships it inside an
//! [`Envelope`]. The receiving side decodes the envelope and rebuilds through
//! the codec registered under the same tag.

use std::{collections::HashMap, fmt, sync::Arc};

use log::debug;

use crate::{
    array::ArrayView,
    error::{Result, ShmArrayError},
    share::{Rebuilder, Reducer},
    wire::{Envelope, WireArray},
};

/// Tag under which plain arrays are registered by default
pub const ARRAY_TAG: &str = "array";

pub type ReduceFn = Arc<dyn Fn(&ArrayView) -> Result<WireArray> + Send + Sync>;
pub type RebuildFn = Arc<dyn Fn(&WireArray) -> Result<ArrayView> + Send + Sync>;

/// A reduce/rebuild function pair
#[derive(Clone)]
pub struct Codec {
    pub reduce: ReduceFn,
    pub rebuild: RebuildFn,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Registry mapping type tags to codecs
///
/// Built once at process start and then shared read-only with the transport.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    codecs: HashMap<String, Codec>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the array codec installed under [`ARRAY_TAG`]
    pub fn with_default_codecs(reducer: Arc<Reducer>, rebuilder: Arc<Rebuilder>) -> Self {
        let mut registry = Self::new();
        registry.register(
            ARRAY_TAG,
            Arc::new(move |view: &ArrayView| reducer.reduce_or_copy(view)),
            Arc::new(move |wire: &WireArray| rebuilder.rebuild_any(wire)),
        );
        registry
    }

    /// Register a codec for `tag`; a later registration for the same tag wins
    ///
    /// Returns the codec that was replaced, if any.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        reduce: ReduceFn,
        rebuild: RebuildFn,
    ) -> Option<Codec> {
        let tag = tag.into();
        let previous = self.codecs.insert(tag.clone(), Codec { reduce, rebuild });
        if previous.is_some() {
            debug!("replaced codec for tag '{}'", tag);
        }
        previous
    }

    /// Codec registered for `tag`
    pub fn lookup(&self, tag: &str) -> Result<Codec> {
        self.codecs
            .get(tag)
            .cloned()
            .ok_or_else(|| ShmArrayError::codec_not_found(tag))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.codecs.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.codecs.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Reduce `view` with the codec for `tag` and encode the resulting envelope
    pub fn encode(&self, tag: &str, view: &ArrayView) -> Result<Vec<u8>> {
        let codec = self.lookup(tag)?;
        let payload = (codec.reduce)(view)?;
        Envelope::new(tag, payload).encode()
    }

    /// Decode an envelope and rebuild it with the codec named by its tag
    pub fn decode(&self, bytes: &[u8]) -> Result<ArrayView> {
        let envelope = Envelope::decode(bytes)?;
        let codec = self.lookup(&envelope.tag)?;
        (codec.rebuild)(&envelope.payload)
    }
}
