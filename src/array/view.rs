//! Array handles over owning buffers and views

use std::{ops::Range, sync::Arc};

use crate::{
    error::{Result, ShmArrayError},
    memory::MemoryBuffer,
};

use super::{
    descriptor::{checked_numel, ArrayDescriptor},
    dtype::{DType, Element},
    node::ArrayNode,
};

/// A handle to an owning array or a strided view into one
///
/// Cloning is cheap and shares the node. Views never copy bytes; they add a
/// link to the ownership chain with an updated descriptor.
#[derive(Debug, Clone)]
pub struct ArrayView {
    node: Arc<ArrayNode>,
}

impl ArrayView {
    /// Owning array from typed elements in row-major order
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::check_len(data.len(), shape)?;
        let bytes = Self::encode(data);
        Ok(Self::owned(MemoryBuffer::from_bytes(bytes), shape, T::DTYPE))
    }

    /// Owning array from raw row-major bytes of any dtype
    pub fn from_bytes(bytes: Vec<u8>, shape: &[usize], dtype: DType) -> Result<Self> {
        let expected = Self::byte_len(shape, dtype)?;
        if bytes.len() != expected {
            return Err(ShmArrayError::invalid_parameter(
                "bytes",
                format!(
                    "{} bytes cannot hold {:?} elements of {}",
                    bytes.len(),
                    shape,
                    dtype
                ),
            ));
        }
        Ok(Self::owned(MemoryBuffer::from_bytes(bytes), shape, dtype))
    }

    /// Zero-filled owning array
    pub fn zeros(shape: &[usize], dtype: DType) -> Result<Self> {
        let len = Self::byte_len(shape, dtype)?;
        Ok(Self::owned(MemoryBuffer::zeroed(len), shape, dtype))
    }

    /// Owning array resident on an accelerator; it cannot be promoted
    pub fn from_vec_on_device<T: Element>(data: Vec<T>, shape: &[usize], ordinal: u32) -> Result<Self> {
        Self::check_len(data.len(), shape)?;
        let bytes = Self::encode(data);
        Ok(Self::owned(MemoryBuffer::on_device(bytes, ordinal), shape, T::DTYPE))
    }

    /// View over an existing buffer, rooted at a byte-level owner node
    pub fn over_buffer(buffer: Arc<MemoryBuffer>, descriptor: ArrayDescriptor) -> Result<Self> {
        descriptor.validate(buffer.len())?;
        let root = Arc::new(ArrayNode::Owned {
            descriptor: ArrayDescriptor::contiguous(&[buffer.len()], DType::U8),
            buffer,
        });
        Ok(Self {
            node: Arc::new(ArrayNode::View {
                parent: root,
                descriptor,
            }),
        })
    }

    fn owned(buffer: MemoryBuffer, shape: &[usize], dtype: DType) -> Self {
        Self {
            node: Arc::new(ArrayNode::Owned {
                buffer: Arc::new(buffer),
                descriptor: ArrayDescriptor::contiguous(shape, dtype),
            }),
        }
    }

    /// Bytes needed to hold `shape` densely; must fit an allocation
    fn byte_len(shape: &[usize], dtype: DType) -> Result<usize> {
        checked_numel(shape)
            .and_then(|numel| numel.checked_mul(dtype.itemsize()))
            .filter(|&len| isize::try_from(len).is_ok())
            .ok_or_else(|| {
                ShmArrayError::invalid_parameter(
                    "shape",
                    format!("{:?} elements of {} exceed the address space", shape, dtype),
                )
            })
    }

    fn check_len(len: usize, shape: &[usize]) -> Result<()> {
        if checked_numel(shape) != Some(len) {
            return Err(ShmArrayError::invalid_parameter(
                "shape",
                format!("{} elements cannot fill shape {:?}", len, shape),
            ));
        }
        Ok(())
    }

    fn encode<T: Element>(data: Vec<T>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(data.len() * T::DTYPE.itemsize());
        for value in data {
            value.write_bytes(&mut bytes);
        }
        bytes
    }

    pub fn node(&self) -> &Arc<ArrayNode> {
        &self.node
    }

    pub fn descriptor(&self) -> &ArrayDescriptor {
        self.node.descriptor()
    }

    pub fn shape(&self) -> &[usize] {
        &self.descriptor().shape
    }

    /// Byte strides
    pub fn strides(&self) -> &[isize] {
        &self.descriptor().strides
    }

    pub fn dtype(&self) -> DType {
        self.descriptor().dtype
    }

    /// Byte offset from the start of the owning buffer
    pub fn offset(&self) -> usize {
        self.descriptor().offset
    }

    pub fn ndim(&self) -> usize {
        self.descriptor().ndim()
    }

    pub fn numel(&self) -> usize {
        self.descriptor().numel()
    }

    pub fn nbytes(&self) -> usize {
        self.descriptor().nbytes()
    }

    pub fn is_contiguous(&self) -> bool {
        self.descriptor().is_contiguous()
    }

    pub fn buffer(&self) -> &Arc<MemoryBuffer> {
        self.node.buffer()
    }

    pub fn is_owner(&self) -> bool {
        self.node.is_owning()
    }

    pub fn is_shared(&self) -> bool {
        self.buffer().is_shared()
    }

    /// Whether both arrays read from the same buffer
    pub fn shares_buffer_with(&self, other: &ArrayView) -> bool {
        Arc::ptr_eq(self.buffer(), other.buffer())
    }

    fn derive(&self, descriptor: ArrayDescriptor) -> Self {
        Self {
            node: Arc::new(ArrayNode::View {
                parent: Arc::clone(&self.node),
                descriptor,
            }),
        }
    }

    /// Restrict `axis` to `range`
    pub fn slice(&self, axis: usize, range: Range<usize>) -> Result<Self> {
        Ok(self.derive(self.descriptor().slice_axis(axis, range.start, range.end)?))
    }

    /// Keep every `step`-th element along `axis`
    pub fn step_by(&self, axis: usize, step: usize) -> Result<Self> {
        Ok(self.derive(self.descriptor().step_axis(axis, step)?))
    }

    /// Reverse `axis`
    pub fn flip(&self, axis: usize) -> Result<Self> {
        Ok(self.derive(self.descriptor().flip_axis(axis)?))
    }

    /// Fix `axis` at `index`, dropping one dimension
    pub fn index_axis(&self, axis: usize, index: usize) -> Result<Self> {
        Ok(self.derive(self.descriptor().index_axis(axis, index)?))
    }

    pub fn permute(&self, axes: &[usize]) -> Result<Self> {
        Ok(self.derive(self.descriptor().permute(axes)?))
    }

    /// Reverse all axes
    pub fn transpose(&self) -> Self {
        let mut descriptor = self.descriptor().clone();
        descriptor.shape.reverse();
        descriptor.strides.reverse();
        self.derive(descriptor)
    }

    /// New shape over the same bytes; contiguous arrays only
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        Ok(self.derive(self.descriptor().reshape(shape)?))
    }

    /// Wrap this array in an opaque node that resolution stops at
    pub fn wrap_foreign(&self, kind: impl Into<String>) -> Self {
        Self {
            node: Arc::new(ArrayNode::Foreign {
                kind: kind.into(),
                parent: Arc::clone(&self.node),
                descriptor: self.descriptor().clone(),
            }),
        }
    }

    /// Elements as densely packed row-major bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let descriptor = self.descriptor();
        let buffer = self.buffer();
        descriptor.validate(buffer.len())?;

        let itemsize = descriptor.itemsize();
        buffer.with_bytes(|bytes| {
            let mut out = Vec::with_capacity(descriptor.nbytes());
            descriptor.for_each_position(|pos| out.extend_from_slice(&bytes[pos..pos + itemsize]));
            out
        })
    }

    /// Elements decoded as `T`, which must match the dtype
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        let itemsize = T::DTYPE.itemsize();
        Ok(self
            .to_bytes()?
            .chunks_exact(itemsize)
            .map(T::read_bytes)
            .collect())
    }

    pub fn get<T: Element>(&self, index: &[usize]) -> Result<T> {
        self.check_dtype::<T>()?;
        let pos = self.descriptor().position(index)?;
        let bytes = self.buffer().read(pos, T::DTYPE.itemsize())?;
        Ok(T::read_bytes(&bytes))
    }

    /// Write one element; visible to every array sharing the buffer
    pub fn set<T: Element>(&self, index: &[usize], value: T) -> Result<()> {
        self.check_dtype::<T>()?;
        let pos = self.descriptor().position(index)?;
        let mut bytes = Vec::with_capacity(T::DTYPE.itemsize());
        value.write_bytes(&mut bytes);
        self.buffer().write(pos, &bytes)
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype() {
            return Err(ShmArrayError::invalid_parameter(
                "dtype",
                format!("array holds {}, requested {}", self.dtype(), T::DTYPE),
            ));
        }
        Ok(())
    }
}
