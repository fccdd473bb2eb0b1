//! Borrowed tensor descriptors: shape, byte strides, and a device pointer
//!
//! The engine never owns device memory. Callers describe their buffers with
//! [`TensorRef`] values; the descriptor is a plain value that stays valid for
//! the duration of a single call.

use crate::dtype::DType;
use smallvec::SmallVec;
use std::fmt;

/// Stack allocation threshold for dimensions.
/// Reductions routinely reach rank 8, so descriptors inline up to 8 axes.
const STACK_DIMS: usize = 8;

/// Shape type: size along each dimension
pub type Shape = SmallVec<[usize; STACK_DIMS]>;

/// Strides type: **byte** offsets between consecutive elements along each
/// dimension. Signed, so reversed and otherwise non-contiguous views are
/// first-class.
pub type Strides = SmallVec<[isize; STACK_DIMS]>;

/// Descriptor of a strided tensor living in device (or host) memory
///
/// Address of the element at indices `[i0, i1, ..., in]`:
///   `base + i0 * strides[0] + i1 * strides[1] + ... + in * strides[n]`
/// where `base` points at the all-zero-coordinate element and strides are in
/// bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TensorRef {
    /// Device pointer to the element at coordinate zero
    pub base: u64,
    /// Element type
    pub dtype: DType,
    /// Size along each dimension
    pub shape: Shape,
    /// Byte stride along each dimension (signed)
    pub strides: Strides,
}

impl TensorRef {
    /// Describe a contiguous (row-major/C-order) tensor
    ///
    /// # Example
    /// ```
    /// use ndreduce::dtype::DType;
    /// use ndreduce::tensor::TensorRef;
    /// let t = TensorRef::contiguous(0x1000, DType::F32, &[2, 3, 4]);
    /// assert_eq!(t.strides.as_slice(), &[48, 16, 4]);
    /// ```
    pub fn contiguous(base: u64, dtype: DType, shape: &[usize]) -> Self {
        let shape: Shape = shape.iter().copied().collect();
        let strides = contiguous_byte_strides(&shape, dtype.size_in_bytes());
        Self {
            base,
            dtype,
            shape,
            strides,
        }
    }

    /// Describe a tensor with explicit byte strides
    pub fn strided(base: u64, dtype: DType, shape: &[usize], strides: &[isize]) -> Self {
        debug_assert_eq!(shape.len(), strides.len());
        Self {
            base,
            dtype,
            shape: shape.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
        }
    }

    /// Describe a scalar (rank-0) tensor
    pub fn scalar(base: u64, dtype: DType) -> Self {
        Self {
            base,
            dtype,
            shape: SmallVec::new(),
            strides: SmallVec::new(),
        }
    }

    /// Number of dimensions
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements (1 for rank-0 tensors)
    #[inline]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when any axis has length zero
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&d| d == 0)
    }

    /// Total bytes spanned by a contiguous tensor of this shape and dtype
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype.size_in_bytes()
    }
}

impl fmt::Debug for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TensorRef {{ base: {:#x}, dtype: {}, shape: {:?}, strides: {:?} }}",
            self.base,
            self.dtype,
            self.shape.as_slice(),
            self.strides.as_slice()
        )
    }
}

/// Compute contiguous byte strides for a shape (row-major order)
pub fn contiguous_byte_strides(shape: &[usize], elem_size: usize) -> Strides {
    if shape.is_empty() {
        return SmallVec::new();
    }

    let mut strides: Strides = SmallVec::with_capacity(shape.len());
    let mut stride = elem_size as isize;

    for &dim in shape.iter().rev() {
        strides.push(stride);
        stride *= dim as isize;
    }

    strides.reverse();
    strides
}
