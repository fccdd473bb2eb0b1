//! Error types for ndreduce

use crate::dtype::DType;
use thiserror::Error;

/// Result type alias using ndreduce's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or launching a reduction
#[derive(Error, Debug)]
pub enum Error {
    /// Destination rank inconsistent with source rank minus reduced-axis count
    #[error(
        "Rank mismatch: source rank {src_rank} with {n_reduce} reduced axes, \
         got destination rank {dst_rank}"
    )]
    BadRank {
        /// Source tensor rank
        src_rank: usize,
        /// Number of reduced axes
        n_reduce: usize,
        /// Actual destination rank
        dst_rank: usize,
    },

    /// Reduce axis out of range or listed twice
    #[error("Invalid reduce axis {axis} for tensor with {rank} dimensions")]
    BadAxis {
        /// The offending axis index
        axis: usize,
        /// Source tensor rank
        rank: usize,
    },

    /// Free-axis lengths of the source do not match the destination axes
    #[error("Shape mismatch: expected destination shape {expected:?}, got {got:?}")]
    BadShape {
        /// Expected destination shape (free axes of the source, in order)
        expected: Vec<usize>,
        /// Actual destination shape
        got: Vec<usize>,
    },

    /// Operator/dtype combination unsupported
    #[error("Unsupported dtype {dtype} for operation '{op}'")]
    BadType {
        /// The unsupported dtype
        dtype: DType,
        /// The operation name
        op: &'static str,
    },

    /// The operator returns an argument stream but none was supplied
    #[error("Operation '{op}' requires a destination index tensor")]
    MissingIndex {
        /// The operation name
        op: &'static str,
    },

    /// A destination index tensor was supplied but the operator returns none
    #[error("Operation '{op}' does not produce indices, but an index tensor was supplied")]
    UnexpectedIndex {
        /// The operation name
        op: &'static str,
    },

    /// Device buffer allocation failed
    #[error("Device allocation of {size} bytes failed")]
    DeviceAlloc {
        /// Requested size in bytes
        size: usize,
    },

    /// Kernel source rejected by the compiler collaborator
    #[error("Kernel compilation failed for '{kernel}': {reason}")]
    CompileFail {
        /// Name of the kernel being compiled
        kernel: String,
        /// Compiler diagnostic, verbatim
        reason: String,
    },

    /// Device submission rejected
    #[error("Kernel launch failed: {reason}")]
    LaunchFail {
        /// Device diagnostic, verbatim
        reason: String,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        Self::BadShape {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Create an unsupported dtype error
    pub fn bad_type(dtype: DType, op: &'static str) -> Self {
        Self::BadType { dtype, op }
    }
}
