//! # ndreduce
//!
//! **Generalized N-dimensional tensor reduction for GPUs, with
//! runtime-generated kernels.**
//!
//! ndreduce folds an arbitrary subset of a strided tensor's axes with one of
//! a fixed set of associative operators (`sum`, `prod`, `prodnz`, `max`,
//! `min`, bitwise `and`/`or`/`xor`, logical `any`/`all`, and the
//! argument-returning `argmax`/`argmin`/`maxandargmax`/`minandargmin`) at
//! near-memory-bandwidth rates, for any rank, any (possibly negative)
//! strides, and any choice of reduced axes.
//!
//! ## How it works
//!
//! - A **planner** classifies axes into free and reduced sets, permutes and
//!   coalesces them for locality, and splits the workload across blocks,
//!   warps, and threads.
//! - A **kernel generator** emits one CUDA kernel per *static signature*
//!   (operator, element types, rank bounds); shapes and strides are launch
//!   arguments, so a single binary serves every call shape within bounds.
//! - A process-wide **kernel cache** (in memory, optionally on disk under
//!   `NDREDUCE_CACHE_DIR`) makes compilation a first-use cost only.
//!
//! Argument operators are *order-sensitive by contract*: the returned flat
//! index weights reduced-axis coordinates by the caller's axis order, so
//! reordering `reduce_axes` reorders the digits of the result.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ndreduce::prelude::*;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(CpuContext::new());
//! let engine = ReduceEngine::new(ctx.clone());
//!
//! let src = TensorRef::contiguous(src_ptr, DType::F32, &[32, 50, 79]);
//! let max = TensorRef::contiguous(max_ptr, DType::F32, &[50]);
//! let arg = TensorRef::contiguous(arg_ptr, DType::U64, &[50]);
//! engine.max_and_argmax(&max, &arg, &src, &[0, 2])?;
//! ```
//!
//! ## Feature flags
//!
//! - `cpu` (default): host reference backend with kernel-identical semantics
//! - `cuda`: NVIDIA backend (NVRTC runtime compilation via cudarc)
//! - `f16`: F16/BF16 host elements

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod cache;
pub mod codegen;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod ops;
pub mod plan;
pub mod runtime;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::DType;
    pub use crate::engine::ReduceEngine;
    pub use crate::error::{Error, Result};
    pub use crate::ops::ReduceOp;
    pub use crate::runtime::ReduceContext;
    pub use crate::tensor::TensorRef;

    #[cfg(feature = "cpu")]
    pub use crate::runtime::cpu::CpuContext;

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::CudaContext;
}
