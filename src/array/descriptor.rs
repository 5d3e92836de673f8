//! Strided layout descriptors
//!
//! A descriptor places a view inside the byte buffer of its allocation root:
//! a byte `offset`, a `shape`, signed byte `strides` and a `dtype`. Every view
//! transformation here is metadata only and threads the offset structurally,
//! so a view's position relative to its owner is always known without
//! comparing addresses.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmArrayError};

use super::dtype::DType;

/// Natural row-major byte strides for `shape`
///
/// Strides saturate at `isize::MAX` for shapes no buffer could hold.
pub fn row_major_strides(shape: &[usize], itemsize: usize) -> Vec<isize> {
    let mut strides = vec![0isize; shape.len()];
    let mut acc = isize::try_from(itemsize).unwrap_or(isize::MAX);
    for (stride, &dim) in strides.iter_mut().zip(shape).rev() {
        *stride = acc;
        acc = acc.saturating_mul(isize::try_from(dim.max(1)).unwrap_or(isize::MAX));
    }
    strides
}

/// Element count of `shape`, or `None` when it overflows `usize`
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub offset: usize,
    pub shape: Vec<usize>,
    pub strides: Vec<isize>,
    pub dtype: DType,
}

impl ArrayDescriptor {
    pub fn new(offset: usize, shape: Vec<usize>, strides: Vec<isize>, dtype: DType) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(ShmArrayError::invalid_parameter(
                "strides",
                format!("rank mismatch: shape {:?} vs strides {:?}", shape, strides),
            ));
        }
        Ok(Self {
            offset,
            shape,
            strides,
            dtype,
        })
    }

    /// Full-extent row-major layout starting at byte 0
    pub fn contiguous(shape: &[usize], dtype: DType) -> Self {
        Self {
            offset: 0,
            shape: shape.to_vec(),
            strides: row_major_strides(shape, dtype.itemsize()),
            dtype,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element count; saturates for layouts that failed validation
    pub fn numel(&self) -> usize {
        checked_numel(&self.shape).unwrap_or(usize::MAX)
    }

    pub fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    /// Bytes occupied by the elements themselves, ignoring gaps
    pub fn nbytes(&self) -> usize {
        self.numel().saturating_mul(self.itemsize())
    }

    /// Element bytes, or `OffsetComputation` when the count overflows
    pub fn checked_nbytes(&self) -> Result<usize> {
        checked_numel(&self.shape)
            .and_then(|numel| numel.checked_mul(self.itemsize()))
            .ok_or_else(|| {
                ShmArrayError::offset(format!(
                    "{:?} elements of {} overflow usize",
                    self.shape, self.dtype
                ))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.shape.contains(&0)
    }

    /// Whether the elements are laid out densely in row-major order
    pub fn is_contiguous(&self) -> bool {
        let natural = row_major_strides(&self.shape, self.itemsize());
        self.shape
            .iter()
            .zip(self.strides.iter().zip(&natural))
            .all(|(&dim, (&stride, &expected))| dim <= 1 || stride == expected)
    }

    /// Half-open byte range `[start, end)` touched by this layout
    pub fn byte_extent(&self) -> Result<(usize, usize)> {
        if self.is_empty() {
            return Ok((self.offset, self.offset));
        }

        let overflow = || ShmArrayError::offset("layout extent overflows");
        let mut low = self.offset as i128;
        let mut high = self.offset as i128;
        for (&dim, &stride) in self.shape.iter().zip(&self.strides) {
            let span = (dim as i128 - 1)
                .checked_mul(stride as i128)
                .ok_or_else(overflow)?;
            if span < 0 {
                low = low.checked_add(span).ok_or_else(overflow)?;
            } else {
                high = high.checked_add(span).ok_or_else(overflow)?;
            }
        }
        high = high
            .checked_add(self.itemsize() as i128)
            .ok_or_else(overflow)?;

        if low < 0 {
            return Err(ShmArrayError::offset(format!(
                "layout reaches {} bytes before the buffer start",
                -low
            )));
        }
        let to_usize = |v: i128| {
            usize::try_from(v).map_err(|_| ShmArrayError::offset("layout extent overflows usize"))
        };
        Ok((to_usize(low)?, to_usize(high)?))
    }

    /// Check that every element lies inside a buffer of `buffer_len` bytes
    pub fn validate(&self, buffer_len: usize) -> Result<()> {
        self.checked_nbytes()?;
        let (_, end) = self.byte_extent()?;
        if end > buffer_len || self.offset > buffer_len {
            return Err(ShmArrayError::offset(format!(
                "layout ends at byte {} but the owner holds {} bytes",
                end.max(self.offset),
                buffer_len
            )));
        }
        Ok(())
    }

    /// Same layout moved to start at `offset`
    pub fn with_offset(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Visit the byte position of every element in row-major index order
    ///
    /// The layout must have been validated against its buffer first.
    pub fn for_each_position(&self, mut f: impl FnMut(usize)) {
        if self.is_empty() {
            return;
        }
        let ndim = self.ndim();
        let mut index = vec![0usize; ndim];
        let mut pos = self.offset as isize;
        loop {
            f(pos as usize);

            let mut axis = ndim;
            loop {
                if axis == 0 {
                    return;
                }
                axis -= 1;
                index[axis] += 1;
                pos += self.strides[axis];
                if index[axis] < self.shape[axis] {
                    break;
                }
                pos -= self.strides[axis] * self.shape[axis] as isize;
                index[axis] = 0;
            }
        }
    }

    /// Byte position of one element
    pub fn position(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.ndim() {
            return Err(ShmArrayError::invalid_parameter(
                "index",
                format!("expected {} indices, got {}", self.ndim(), index.len()),
            ));
        }
        let mut delta = 0isize;
        for (axis, (&i, &dim)) in index.iter().zip(&self.shape).enumerate() {
            if i >= dim {
                return Err(ShmArrayError::invalid_parameter(
                    "index",
                    format!("index {} out of bounds for axis {} of length {}", i, axis, dim),
                ));
            }
            delta = delta
                .checked_add(self.axis_delta(axis, i)?)
                .ok_or_else(|| ShmArrayError::offset(format!("position {:?} overflows", index)))?;
        }
        self.shifted(delta)
    }

    /// Byte distance covered by `steps` elements along `axis`
    fn axis_delta(&self, axis: usize, steps: usize) -> Result<isize> {
        isize::try_from(steps)
            .ok()
            .and_then(|steps| steps.checked_mul(self.strides[axis]))
            .ok_or_else(|| {
                ShmArrayError::offset(format!(
                    "{} steps of stride {} overflow",
                    steps, self.strides[axis]
                ))
            })
    }

    fn shifted(&self, delta: isize) -> Result<usize> {
        (self.offset as isize)
            .checked_add(delta)
            .and_then(|pos| usize::try_from(pos).ok())
            .ok_or_else(|| ShmArrayError::offset(format!("offset {} shifted by {}", self.offset, delta)))
    }

    fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.ndim() {
            return Err(ShmArrayError::invalid_parameter(
                "axis",
                format!("invalid axis {} for rank {}", axis, self.ndim()),
            ));
        }
        Ok(())
    }

    /// Restrict `axis` to `start..end`
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Self> {
        self.check_axis(axis)?;
        if start > end || end > self.shape[axis] {
            return Err(ShmArrayError::invalid_parameter(
                "range",
                format!("{}..{} out of bounds for axis of length {}", start, end, self.shape[axis]),
            ));
        }
        let mut out = self.clone();
        if start < end {
            out.offset = self.shifted(self.axis_delta(axis, start)?)?;
        }
        out.shape[axis] = end - start;
        Ok(out)
    }

    /// Keep every `step`-th element along `axis`
    pub fn step_axis(&self, axis: usize, step: usize) -> Result<Self> {
        self.check_axis(axis)?;
        if step == 0 {
            return Err(ShmArrayError::invalid_parameter("step", "step must be at least 1"));
        }
        let mut out = self.clone();
        out.shape[axis] = self.shape[axis].div_ceil(step);
        // a single remaining element never moves by its stride
        if out.shape[axis] > 1 {
            out.strides[axis] = self.axis_delta(axis, step).map_err(|_| {
                ShmArrayError::invalid_parameter(
                    "step",
                    format!("step {} overflows the stride of axis {}", step, axis),
                )
            })?;
        }
        Ok(out)
    }

    /// Reverse the order of `axis`
    pub fn flip_axis(&self, axis: usize) -> Result<Self> {
        self.check_axis(axis)?;
        let mut out = self.clone();
        if self.shape[axis] > 0 {
            out.offset = self.shifted(self.axis_delta(axis, self.shape[axis] - 1)?)?;
        }
        out.strides[axis] = -self.strides[axis];
        Ok(out)
    }

    /// Fix `axis` at `index`, dropping the dimension
    pub fn index_axis(&self, axis: usize, index: usize) -> Result<Self> {
        self.check_axis(axis)?;
        if index >= self.shape[axis] {
            return Err(ShmArrayError::invalid_parameter(
                "index",
                format!("index {} out of bounds for axis of length {}", index, self.shape[axis]),
            ));
        }
        let mut out = self.clone();
        out.offset = self.shifted(self.axis_delta(axis, index)?)?;
        out.shape.remove(axis);
        out.strides.remove(axis);
        Ok(out)
    }

    /// Reorder dimensions; `axes` must be a permutation of `0..ndim`
    pub fn permute(&self, axes: &[usize]) -> Result<Self> {
        let mut seen = vec![false; self.ndim()];
        if axes.len() != self.ndim() {
            return Err(ShmArrayError::invalid_parameter(
                "axes",
                format!("expected {} axes, got {}", self.ndim(), axes.len()),
            ));
        }
        for &axis in axes {
            self.check_axis(axis)?;
            if std::mem::replace(&mut seen[axis], true) {
                return Err(ShmArrayError::invalid_parameter(
                    "axes",
                    format!("axis {} repeated in {:?}", axis, axes),
                ));
            }
        }
        let mut out = self.clone();
        out.shape = axes.iter().map(|&a| self.shape[a]).collect();
        out.strides = axes.iter().map(|&a| self.strides[a]).collect();
        Ok(out)
    }

    /// Reinterpret a contiguous layout with a new shape of equal element count
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if !self.is_contiguous() {
            return Err(ShmArrayError::invalid_parameter(
                "shape",
                "only contiguous layouts can be reshaped without copying",
            ));
        }
        if checked_numel(shape) != checked_numel(&self.shape) {
            return Err(ShmArrayError::invalid_parameter(
                "shape",
                format!("cannot reshape {:?} into {:?}", self.shape, shape),
            ));
        }
        Ok(Self {
            offset: self.offset,
            shape: shape.to_vec(),
            strides: row_major_strides(shape, self.itemsize()),
            dtype: self.dtype,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> ArrayDescriptor {
        // 4 x 3 f64
        ArrayDescriptor::contiguous(&[4, 3], DType::F64)
    }

    fn positions(desc: &ArrayDescriptor) -> Vec<usize> {
        let mut out = Vec::new();
        desc.for_each_position(|p| out.push(p));
        out
    }

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides(&[4, 3], 8), vec![24, 8]);
        assert_eq!(row_major_strides(&[2, 0, 5], 4), vec![20, 20, 4]);
        assert!(row_major_strides(&[], 4).is_empty());
    }

    #[test]
    fn test_extent_and_validation() {
        let desc = matrix();
        assert_eq!(desc.byte_extent().unwrap(), (0, 96));
        assert!(desc.validate(96).is_ok());
        assert!(matches!(
            desc.validate(95),
            Err(ShmArrayError::OffsetComputation { .. })
        ));
    }

    #[test]
    fn test_negative_strides_cannot_reach_before_start() {
        let desc = ArrayDescriptor::new(8, vec![3], vec![-8], DType::F64).unwrap();
        assert!(desc.validate(1024).is_err());
        let desc = ArrayDescriptor::new(16, vec![3], vec![-8], DType::F64).unwrap();
        assert_eq!(desc.byte_extent().unwrap(), (0, 24));
    }

    #[test]
    fn test_empty_layout_only_checks_offset() {
        let desc = ArrayDescriptor::new(96, vec![0, 3], vec![24, 8], DType::F64).unwrap();
        assert!(desc.validate(96).is_ok());
        assert!(desc.validate(95).is_err());
    }

    #[test]
    fn test_slice_threads_offset() {
        let rows = matrix().slice_axis(0, 2, 4).unwrap();
        assert_eq!(rows.offset, 48);
        assert_eq!(rows.shape, vec![2, 3]);
        assert!(rows.is_contiguous());

        let col = rows.index_axis(1, 2).unwrap();
        assert_eq!(col.offset, 64);
        assert_eq!(positions(&col), vec![64, 88]);
        assert!(!col.is_contiguous());
    }

    #[test]
    fn test_flip_and_step() {
        let flipped = matrix().flip_axis(0).unwrap();
        assert_eq!(flipped.offset, 72);
        assert_eq!(flipped.strides, vec![-24, 8]);
        assert_eq!(flipped.byte_extent().unwrap(), (0, 96));

        let stepped = matrix().step_axis(1, 2).unwrap();
        assert_eq!(stepped.shape, vec![4, 2]);
        assert_eq!(positions(&stepped)[..4].to_vec(), vec![0, 16, 24, 40]);
    }

    #[test]
    fn test_permute_and_reshape() {
        let t = matrix().permute(&[1, 0]).unwrap();
        assert_eq!(t.shape, vec![3, 4]);
        assert_eq!(t.strides, vec![8, 24]);
        assert!(t.reshape(&[12]).is_err());
        assert!(matrix().permute(&[0, 0]).is_err());

        let flat = matrix().reshape(&[2, 6]).unwrap();
        assert_eq!(flat.strides, vec![48, 8]);
        assert!(matrix().reshape(&[5]).is_err());
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let desc =
            ArrayDescriptor::new(0, vec![1 << 32, 1 << 32], vec![8, 8], DType::U64).unwrap();
        assert_eq!(desc.numel(), usize::MAX);
        assert!(!desc.is_empty());
        assert!(matches!(
            desc.validate(64),
            Err(ShmArrayError::OffsetComputation { .. })
        ));

        // zero strides keep the extent small but the element count still overflows
        let broadcast =
            ArrayDescriptor::new(0, vec![usize::MAX, 2], vec![0, 0], DType::U8).unwrap();
        assert!(broadcast.checked_nbytes().is_err());
        assert!(broadcast.validate(64).is_err());

        let spans = ArrayDescriptor::new(0, vec![usize::MAX; 3], vec![isize::MAX; 3], DType::U8)
            .unwrap();
        assert!(spans.byte_extent().is_err());
    }

    #[test]
    fn test_zero_dimension_is_empty_whatever_the_rest() {
        let desc = ArrayDescriptor::new(8, vec![usize::MAX, 0], vec![8, 8], DType::F64).unwrap();
        assert!(desc.is_empty());
        assert_eq!(desc.numel(), 0);
        assert_eq!(desc.byte_extent().unwrap(), (8, 8));
        assert!(desc.validate(8).is_ok());
    }

    #[test]
    fn test_huge_steps() {
        let desc = ArrayDescriptor::contiguous(&[4], DType::U8);
        let single = desc.step_axis(0, usize::MAX).unwrap();
        assert_eq!(single.shape, vec![1]);
        assert_eq!(single.strides, vec![1]);

        let wide = ArrayDescriptor::new(0, vec![usize::MAX], vec![8], DType::U64).unwrap();
        assert!(matches!(
            wide.step_axis(0, 1 << 61),
            Err(ShmArrayError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_position() {
        let desc = matrix().slice_axis(0, 1, 3).unwrap();
        assert_eq!(desc.position(&[1, 2]).unwrap(), 24 + 24 + 16);
        assert!(desc.position(&[2, 0]).is_err());
        assert!(desc.position(&[0]).is_err());
    }
}
