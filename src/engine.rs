//! The reduction engine: validate, plan, compile, launch
//!
//! One [`ReduceEngine`] per device context. Each call flows through the same
//! path: the planner validates the request and produces a plan, the
//! configurator picks a grid/block split, the kernel cache supplies the
//! compiled kernel for the plan's static signature, and the launch arguments
//! are marshalled and submitted. Validation errors are returned before any
//! device work; device errors are surfaced verbatim.
//!
//! Reductions over an empty axis never launch: the engine writes each
//! destination cell's identity (and zeroes the argument stream) directly.

use crate::cache::KernelCache;
use crate::codegen::KernelSpec;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::ops::{Identity, ReduceOp};
use crate::plan::{self, ReducePlan};
use crate::runtime::{KernelArgs, ReduceContext};
use crate::tensor::TensorRef;
use std::path::PathBuf;
use std::sync::Arc;

/// Reduction engine bound to one device context
pub struct ReduceEngine<C: ReduceContext> {
    ctx: Arc<C>,
    kernels: KernelCache<C::Kernel>,
}

impl<C: ReduceContext> ReduceEngine<C> {
    /// Create an engine; the kernel disk cache is configured from
    /// `NDREDUCE_CACHE_DIR`
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            kernels: KernelCache::new(),
            ctx,
        }
    }

    /// Create an engine with an explicit disk-cache directory
    /// (`None` keeps kernels in memory only)
    pub fn with_cache_dir(ctx: Arc<C>, dir: Option<PathBuf>) -> Self {
        Self {
            kernels: KernelCache::with_dir(dir),
            ctx,
        }
    }

    /// The device context this engine drives
    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Number of kernels compiled so far
    pub fn compiled_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Generic entry point
    ///
    /// For index-only operators (`argmax`/`argmin`) the destination *is* the
    /// index stream: pass it as `dst` and leave `dst_idx` as `None`.
    pub fn reduce(
        &self,
        op: ReduceOp,
        dst: &TensorRef,
        dst_idx: Option<&TensorRef>,
        src: &TensorRef,
        axes: &[usize],
    ) -> Result<()> {
        let dst_idx = match (op.writes_value(), dst_idx) {
            (false, None) => Some(dst),
            (false, Some(_)) => return Err(Error::UnexpectedIndex { op: op.name() }),
            (true, other) => other,
        };

        let plan = plan::build(op, dst, dst_idx, src, axes)?;

        if plan.m == 0 {
            // Every destination cell was removed by an empty free axis.
            return Ok(());
        }
        if plan.n == 0 {
            return self.fill_empty(&plan);
        }

        let spec = KernelSpec::for_plan(&plan);
        let shape = plan::configure(
            plan.m,
            plan.n,
            self.ctx.warp_size(),
            self.ctx.max_block_size(),
        )?;
        let kernel = self.kernels.get_or_compile(self.ctx.as_ref(), &spec)?;
        let args = KernelArgs::from_plan(&plan, &spec, &shape);
        self.ctx.launch(&kernel, &shape, &args)
    }

    /// Zero-length fibres: write the operator's identity to every cell
    /// (extreme values for max/min, which have no identity) and zero the
    /// argument stream, without touching the device kernel path.
    fn fill_empty(&self, plan: &ReducePlan) -> Result<()> {
        let value = plan
            .op
            .writes_value()
            .then(|| identity_bytes(plan.op, plan.src_dtype));
        let idx_zero = plan.idx_dtype.map(|d| vec![0u8; d.size_in_bytes()]);

        for fib in 0..plan.m as u64 {
            let mut rem = fib;
            let (mut doff, mut ioff) = (0i64, 0i64);
            for axis in &plan.free {
                let c = (rem % axis.len as u64) as i64;
                rem /= axis.len as u64;
                doff += c * axis.dst_stride as i64;
                ioff += c * axis.idx_stride as i64;
            }
            if let Some(value) = &value {
                self.ctx
                    .write(plan.dst_base.wrapping_add(doff as u64), value)?;
            }
            if let Some(zero) = &idx_zero {
                self.ctx
                    .write(plan.idx_base.wrapping_add(ioff as u64), zero)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Named entry points, one per operator
    // ------------------------------------------------------------------

    /// Sum over the reduced axes
    pub fn sum(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Sum, dst, None, src, axes)
    }

    /// Product over the reduced axes
    pub fn prod(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Prod, dst, None, src, axes)
    }

    /// Product over the reduced axes, treating zero elements as 1
    pub fn prodnz(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::ProdNz, dst, None, src, axes)
    }

    /// Maximum over the reduced axes
    pub fn max(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Max, dst, None, src, axes)
    }

    /// Minimum over the reduced axes
    pub fn min(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Min, dst, None, src, axes)
    }

    /// Bitwise AND over the reduced axes
    pub fn bitand(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::And, dst, None, src, axes)
    }

    /// Bitwise OR over the reduced axes
    pub fn bitor(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Or, dst, None, src, axes)
    }

    /// Bitwise XOR over the reduced axes
    pub fn bitxor(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Xor, dst, None, src, axes)
    }

    /// 1 if any reduced element is non-zero, else 0
    pub fn any(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Any, dst, None, src, axes)
    }

    /// 1 if every reduced element is non-zero, else 0
    pub fn all(&self, dst: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::All, dst, None, src, axes)
    }

    /// Flat index of the maximum element of each fibre
    pub fn argmax(&self, dst_arg: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Argmax, dst_arg, None, src, axes)
    }

    /// Flat index of the minimum element of each fibre
    pub fn argmin(&self, dst_arg: &TensorRef, src: &TensorRef, axes: &[usize]) -> Result<()> {
        self.reduce(ReduceOp::Argmin, dst_arg, None, src, axes)
    }

    /// Maximum of each fibre together with its flat index; the value and
    /// index always come from the same element
    pub fn max_and_argmax(
        &self,
        dst: &TensorRef,
        dst_arg: &TensorRef,
        src: &TensorRef,
        axes: &[usize],
    ) -> Result<()> {
        self.reduce(ReduceOp::MaxAndArgmax, dst, Some(dst_arg), src, axes)
    }

    /// Minimum of each fibre together with its flat index
    pub fn min_and_argmin(
        &self,
        dst: &TensorRef,
        dst_arg: &TensorRef,
        src: &TensorRef,
        axes: &[usize],
    ) -> Result<()> {
        self.reduce(ReduceOp::MinAndArgmin, dst, Some(dst_arg), src, axes)
    }
}

/// Native-endian byte pattern of the value an empty reduction writes
fn identity_bytes(op: ReduceOp, dtype: DType) -> Vec<u8> {
    let size = dtype.size_in_bytes();
    match op.identity() {
        Identity::Zero => vec![0u8; size],
        Identity::AllOnes => vec![0xFFu8; size],
        Identity::One => one_bytes(dtype),
        Identity::FirstElement => extreme_bytes(dtype, !op.compare_greater()),
    }
}

fn one_bytes(dtype: DType) -> Vec<u8> {
    match dtype {
        DType::F64 => 1.0f64.to_ne_bytes().to_vec(),
        DType::F32 => 1.0f32.to_ne_bytes().to_vec(),
        DType::F16 => 0x3C00u16.to_ne_bytes().to_vec(),
        DType::BF16 => 0x3F80u16.to_ne_bytes().to_vec(),
        DType::I64 => 1i64.to_ne_bytes().to_vec(),
        DType::I32 => 1i32.to_ne_bytes().to_vec(),
        DType::I16 => 1i16.to_ne_bytes().to_vec(),
        DType::I8 => vec![1u8],
        DType::U64 => 1u64.to_ne_bytes().to_vec(),
        DType::U32 => 1u32.to_ne_bytes().to_vec(),
        DType::U16 => 1u16.to_ne_bytes().to_vec(),
        DType::U8 | DType::Bool => vec![1u8],
    }
}

/// Lowest (for max) or highest (for min) representable value
fn extreme_bytes(dtype: DType, highest: bool) -> Vec<u8> {
    match (dtype, highest) {
        (DType::F64, false) => f64::NEG_INFINITY.to_ne_bytes().to_vec(),
        (DType::F64, true) => f64::INFINITY.to_ne_bytes().to_vec(),
        (DType::F32, false) => f32::NEG_INFINITY.to_ne_bytes().to_vec(),
        (DType::F32, true) => f32::INFINITY.to_ne_bytes().to_vec(),
        // Half-precision infinities, by bit pattern
        (DType::F16, false) => 0xFC00u16.to_ne_bytes().to_vec(),
        (DType::F16, true) => 0x7C00u16.to_ne_bytes().to_vec(),
        (DType::BF16, false) => 0xFF80u16.to_ne_bytes().to_vec(),
        (DType::BF16, true) => 0x7F80u16.to_ne_bytes().to_vec(),
        (DType::I64, false) => i64::MIN.to_ne_bytes().to_vec(),
        (DType::I64, true) => i64::MAX.to_ne_bytes().to_vec(),
        (DType::I32, false) => i32::MIN.to_ne_bytes().to_vec(),
        (DType::I32, true) => i32::MAX.to_ne_bytes().to_vec(),
        (DType::I16, false) => i16::MIN.to_ne_bytes().to_vec(),
        (DType::I16, true) => i16::MAX.to_ne_bytes().to_vec(),
        (DType::I8, false) => i8::MIN.to_ne_bytes().to_vec(),
        (DType::I8, true) => i8::MAX.to_ne_bytes().to_vec(),
        (DType::U64, false) => vec![0u8; 8],
        (DType::U64, true) => u64::MAX.to_ne_bytes().to_vec(),
        (DType::U32, false) => vec![0u8; 4],
        (DType::U32, true) => u32::MAX.to_ne_bytes().to_vec(),
        (DType::U16, false) => vec![0u8; 2],
        (DType::U16, true) => u16::MAX.to_ne_bytes().to_vec(),
        (DType::U8, false) => vec![0u8],
        (DType::U8, true) => vec![0xFFu8],
        (DType::Bool, false) => vec![0u8],
        (DType::Bool, true) => vec![1u8],
    }
}
