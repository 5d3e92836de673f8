//! Transport-agnostic wire forms of shared arrays
//!
//! A [`WireDescriptor`] is the logical tuple `(owner, offset, shape, strides,
//! dtype)` that references bytes already living in a shared segment. An
//! [`InlineArray`] is the full-copy fallback for arrays that cannot be shared.
//! [`Envelope`] pairs either form with a registry type tag and is what a
//! transport actually carries, encoded with bincode.

use serde::{Deserialize, Serialize};

use crate::{
    array::{ArrayDescriptor, ArrayView, DType},
    error::{Result, ShmArrayError},
    memory::SegmentHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDescriptor {
    pub owner: SegmentHandle,
    pub offset: u64,
    pub shape: Vec<u64>,
    pub strides: Vec<i64>,
    pub dtype: String,
}

impl WireDescriptor {
    /// Describe `descriptor` inside `owner`, rejecting layouts that do not fit
    pub fn new(owner: SegmentHandle, descriptor: &ArrayDescriptor) -> Result<Self> {
        descriptor.validate(owner.len()?)?;
        Ok(Self {
            owner,
            offset: descriptor.offset as u64,
            shape: descriptor.shape.iter().map(|&d| d as u64).collect(),
            strides: descriptor.strides.iter().map(|&s| s as i64).collect(),
            dtype: descriptor.dtype.as_str(),
        })
    }

    /// Local layout for this descriptor, validated against the owner size
    pub fn to_array_descriptor(&self) -> Result<ArrayDescriptor> {
        let dtype: DType = self.dtype.parse()?;
        let offset = usize::try_from(self.offset)
            .map_err(|_| ShmArrayError::offset(format!("offset {} exceeds usize", self.offset)))?;
        let shape = self
            .shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ShmArrayError::offset("shape exceeds usize"))?;
        let strides = self
            .strides
            .iter()
            .map(|&s| isize::try_from(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ShmArrayError::offset("stride exceeds isize"))?;

        let descriptor = ArrayDescriptor::new(offset, shape, strides, dtype)?;
        descriptor.validate(self.owner.len()?)?;
        Ok(descriptor)
    }
}

/// Densely packed copy of an array, used when sharing is not possible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineArray {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub bytes: Vec<u8>,
    /// CRC32 of `bytes`
    pub checksum: u32,
}

impl InlineArray {
    /// Copy the elements of `view`
    pub fn from_view(view: &ArrayView) -> Result<Self> {
        let bytes = view.to_bytes()?;
        Ok(Self {
            shape: view.shape().iter().map(|&d| d as u64).collect(),
            dtype: view.dtype().as_str(),
            checksum: crc32fast::hash(&bytes),
            bytes,
        })
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == crc32fast::hash(&self.bytes)
    }

    /// New private array holding the copied elements
    pub fn into_array(self) -> Result<ArrayView> {
        if !self.verify_checksum() {
            return Err(ShmArrayError::serialization(
                "Inline array checksum validation failed",
            ));
        }
        let dtype: DType = self.dtype.parse()?;
        let shape = self
            .shape
            .iter()
            .map(|&d| usize::try_from(d))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ShmArrayError::invalid_parameter("shape", "shape exceeds usize"))?;
        ArrayView::from_bytes(self.bytes, &shape, dtype)
    }
}

/// Either a reference into shared memory or an inline copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireArray {
    Shared(WireDescriptor),
    Inline(InlineArray),
}

impl WireArray {
    pub fn is_shared(&self) -> bool {
        matches!(self, WireArray::Shared(_))
    }

    /// Segment referenced by a shared payload
    pub fn owner(&self) -> Option<&SegmentHandle> {
        match self {
            WireArray::Shared(descriptor) => Some(&descriptor.owner),
            WireArray::Inline(_) => None,
        }
    }

    pub fn shape(&self) -> &[u64] {
        match self {
            WireArray::Shared(descriptor) => &descriptor.shape,
            WireArray::Inline(inline) => &inline.shape,
        }
    }
}

/// A tagged payload as carried by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    pub payload: WireArray,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, payload: WireArray) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
