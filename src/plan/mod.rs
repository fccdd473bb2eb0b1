//! Reduction planning: axis classification, permutation, and coalescing
//!
//! The planner turns a `(dst, dst_idx?, src, reduce_axes)` request into a
//! [`ReducePlan`] the kernel can execute at full memory throughput. All
//! request validation happens here, before any device work.
//!
//! Free axes keep their source-order correspondence with destination axes
//! (the planner may permute the *iteration* order, never the mapping).
//! Reduced axes are order-sensitive for argument operators: the flat index
//! reported for a winning element is its row-major position in the
//! caller-ordered reduced subspace, so those axes are left exactly as the
//! caller listed them.

pub mod schedule;

pub use schedule::{configure, LaunchShape, BLOCK_SIZE};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::ops::ReduceOp;
use crate::tensor::TensorRef;
use smallvec::SmallVec;

/// One free (surviving) axis of the reduction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FreeAxis {
    /// Axis length
    pub len: usize,
    /// Byte stride in the source tensor
    pub src_stride: isize,
    /// Byte stride in the destination tensor
    pub dst_stride: isize,
    /// Byte stride in the index stream (0 when absent)
    pub idx_stride: isize,
}

/// One reduced (folded) axis of the reduction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReduxAxis {
    /// Axis length
    pub len: usize,
    /// Byte stride in the source tensor
    pub src_stride: isize,
}

/// Upper bound on free or reduced slots a single kernel signature can carry
pub const MAX_SLOT_RANK: usize = 16;

/// A planned reduction: a read-only value for the duration of one launch
#[derive(Clone, Debug)]
pub struct ReducePlan {
    /// The operator being applied
    pub op: ReduceOp,
    /// Source element type
    pub src_dtype: DType,
    /// Accumulator type chosen for the operator/element pair
    pub acc_dtype: DType,
    /// Index-stream element type, when the operator tracks one
    pub idx_dtype: Option<DType>,
    /// Free axes in launch iteration order (slot 0 varies fastest)
    pub free: SmallVec<[FreeAxis; 8]>,
    /// Reduced axes; caller order for argument operators, innermost-last
    /// otherwise (the last slot is the hot axis)
    pub redux: SmallVec<[ReduxAxis; 8]>,
    /// Number of independent fibres (product of free lengths)
    pub m: usize,
    /// Length of each fibre (product of reduced lengths)
    pub n: usize,
    /// Source base pointer
    pub src_base: u64,
    /// Destination base pointer
    pub dst_base: u64,
    /// Index-stream base pointer (0 when absent)
    pub idx_base: u64,
}

/// Build a reduction plan, validating the request first
pub fn build(
    op: ReduceOp,
    dst: &TensorRef,
    dst_idx: Option<&TensorRef>,
    src: &TensorRef,
    axes: &[usize],
) -> Result<ReducePlan> {
    let src_rank = src.rank();

    // Axis list: in range, no repeats.
    let mut reduce_mask = [false; 64];
    if src_rank > reduce_mask.len() {
        return Err(Error::BadRank {
            src_rank,
            n_reduce: axes.len(),
            dst_rank: dst.rank(),
        });
    }
    for &axis in axes {
        if axis >= src_rank || reduce_mask[axis] {
            return Err(Error::BadAxis {
                axis,
                rank: src_rank,
            });
        }
        reduce_mask[axis] = true;
    }

    // Rank arithmetic.
    if dst.rank() != src_rank - axes.len() {
        return Err(Error::BadRank {
            src_rank,
            n_reduce: axes.len(),
            dst_rank: dst.rank(),
        });
    }

    // Free axes of src, in source order, must match dst axes in order.
    let free_shape: Vec<usize> = (0..src_rank)
        .filter(|&i| !reduce_mask[i])
        .map(|i| src.shape[i])
        .collect();
    if free_shape != dst.shape.as_slice() {
        return Err(Error::shape_mismatch(&free_shape, &dst.shape));
    }

    // Index stream presence must agree with the operator.
    if op.tracks_index() && dst_idx.is_none() {
        return Err(Error::MissingIndex { op: op.name() });
    }
    if !op.tracks_index() && dst_idx.is_some() {
        return Err(Error::UnexpectedIndex { op: op.name() });
    }
    if let Some(idx) = dst_idx {
        if idx.shape != dst.shape {
            return Err(Error::shape_mismatch(&dst.shape, &idx.shape));
        }
        if !idx.dtype.is_index() {
            return Err(Error::bad_type(idx.dtype, op.name()));
        }
    }

    // Element types.
    if !op.supports(src.dtype) {
        return Err(Error::bad_type(src.dtype, op.name()));
    }
    if op.writes_value() && dst.dtype != src.dtype {
        return Err(Error::bad_type(dst.dtype, op.name()));
    }

    let n: usize = axes.iter().map(|&a| src.shape[a]).product();

    // The index stream must be wide enough for the largest flat index in a
    // single fibre.
    if let Some(idx) = dst_idx {
        let max = idx.dtype.max_index().unwrap_or(0);
        if n > 0 && (n - 1) as u64 > max {
            return Err(Error::bad_type(idx.dtype, op.name()));
        }
    }

    // Classify axes. The j-th free axis of src corresponds to dst axis j.
    let mut free: SmallVec<[FreeAxis; 8]> = SmallVec::new();
    let mut dst_axis = 0usize;
    for i in 0..src_rank {
        if !reduce_mask[i] {
            free.push(FreeAxis {
                len: src.shape[i],
                src_stride: src.strides[i],
                dst_stride: dst.strides[dst_axis],
                idx_stride: dst_idx.map_or(0, |t| t.strides[dst_axis]),
            });
            dst_axis += 1;
        }
    }

    let mut redux: SmallVec<[ReduxAxis; 8]> = axes
        .iter()
        .map(|&a| ReduxAxis {
            len: src.shape[a],
            src_stride: src.strides[a],
        })
        .collect();

    let m: usize = free.iter().map(|f| f.len).product();

    // Length-1 axes are no-ops in every stream (coordinate 0, weight factor
    // 1); dropping them before permutation tightens the coalescing chain.
    free.retain(|f| f.len != 1);
    redux.retain(|r| r.len != 1);

    // Launch iteration order: ascending |src stride| so adjacent fibres
    // touch adjacent memory, then coalesce runs contiguous in all streams.
    free.sort_by_key(|f| f.src_stride.unsigned_abs());
    coalesce_free(&mut free);

    // Reduced axes: argument operators pin both order and digit boundaries.
    // For everything else the fold order is free, so sort for locality and
    // coalesce; the reversal puts the smallest stride in the last slot,
    // which the kernel walks fastest (the hot axis).
    if !op.tracks_index() {
        redux.sort_by_key(|r| r.src_stride.unsigned_abs());
        coalesce_redux(&mut redux);
        redux.reverse();
    }

    if free.len() > MAX_SLOT_RANK || redux.len() > MAX_SLOT_RANK {
        return Err(Error::BadRank {
            src_rank,
            n_reduce: axes.len(),
            dst_rank: dst.rank(),
        });
    }

    Ok(ReducePlan {
        op,
        src_dtype: src.dtype,
        acc_dtype: op.accumulator(src.dtype),
        idx_dtype: dst_idx.map(|t| t.dtype),
        free,
        redux,
        m,
        n,
        src_base: src.base,
        dst_base: dst.base,
        idx_base: dst_idx.map_or(0, |t| t.base),
    })
}

/// Merge adjacent free slots that are exactly contiguous in the source,
/// destination, and index streams. Slot `i` is the inner (faster) axis of
/// the pair; repeated until a fixed point.
fn coalesce_free(free: &mut SmallVec<[FreeAxis; 8]>) {
    let mut i = 0;
    while i + 1 < free.len() {
        let (inner, outer) = (free[i], free[i + 1]);
        let span = inner.len as isize;
        if inner.len > 0
            && inner.src_stride * span == outer.src_stride
            && inner.dst_stride * span == outer.dst_stride
            && inner.idx_stride * span == outer.idx_stride
        {
            free[i] = FreeAxis {
                len: inner.len * outer.len,
                ..inner
            };
            free.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// Merge adjacent reduced slots with contiguous source strides.
/// Only reachable for operators without an argument stream.
fn coalesce_redux(redux: &mut SmallVec<[ReduxAxis; 8]>) {
    let mut i = 0;
    while i + 1 < redux.len() {
        let (inner, outer) = (redux[i], redux[i + 1]);
        if inner.len > 0 && inner.src_stride * inner.len as isize == outer.src_stride {
            redux[i] = ReduxAxis {
                len: inner.len * outer.len,
                src_stride: inner.src_stride,
            };
            redux.remove(i + 1);
        } else {
            i += 1;
        }
    }
}
