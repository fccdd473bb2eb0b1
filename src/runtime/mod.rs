//! Execution backends for the reduction engine
//!
//! [`ReduceContext`] is the collaborator interface the engine drives: buffer
//! management, kernel compilation, and launch submission. The engine never
//! talks to a device API directly, so backends are swappable; the CPU
//! reference backend interprets plans against host memory with the same
//! semantics the generated GPU kernels have.

#[cfg(feature = "cpu")]
pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

use crate::codegen::KernelSpec;
use crate::error::Result;
use crate::plan::{LaunchShape, ReducePlan};
use smallvec::SmallVec;

/// Free-axis descriptor as passed to a kernel launch
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeSlot {
    /// Axis length
    pub len: u64,
    /// Source byte stride
    pub src_stride: i64,
    /// Destination byte stride
    pub dst_stride: i64,
    /// Index-stream byte stride
    pub idx_stride: i64,
}

/// Reduced-axis descriptor as passed to a kernel launch
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReduxSlot {
    /// Axis length
    pub len: u64,
    /// Source byte stride
    pub src_stride: i64,
}

/// Dynamic launch arguments for one reduction kernel invocation
///
/// Slot lists are padded with `len=1, stride=0` entries up to the kernel
/// signature's bounds; a backend pushes them in declaration order: `src`,
/// `dst` (value ops), `dsti` (argument ops), `m`, `n`, `threads_per_red`,
/// then each free slot's fields, then each reduced slot's fields.
#[derive(Clone, Debug)]
pub struct KernelArgs {
    /// Source base pointer
    pub src: u64,
    /// Destination base pointer (0 for index-only operators)
    pub dst: u64,
    /// Index-stream base pointer (0 when absent)
    pub idx: u64,
    /// Number of fibres
    pub m: u64,
    /// Fibre length
    pub n: u64,
    /// Threads cooperating per fibre
    pub threads_per_red: u32,
    /// Free slots, padded to the signature bound
    pub free: SmallVec<[FreeSlot; 8]>,
    /// Reduced slots, padded to the signature bound
    pub redux: SmallVec<[ReduxSlot; 8]>,
}

impl KernelArgs {
    /// Marshal a plan into launch arguments for a kernel signature
    pub fn from_plan(plan: &ReducePlan, spec: &KernelSpec, shape: &LaunchShape) -> Self {
        debug_assert!(plan.free.len() <= spec.max_free);
        debug_assert!(plan.redux.len() <= spec.max_redux);

        let mut free: SmallVec<[FreeSlot; 8]> = plan
            .free
            .iter()
            .map(|f| FreeSlot {
                len: f.len as u64,
                src_stride: f.src_stride as i64,
                dst_stride: f.dst_stride as i64,
                idx_stride: f.idx_stride as i64,
            })
            .collect();
        free.resize(
            spec.max_free,
            FreeSlot {
                len: 1,
                ..Default::default()
            },
        );

        let mut redux: SmallVec<[ReduxSlot; 8]> = SmallVec::new();
        // Padding goes in front: the last slot must stay the fastest digit
        // of the row-major decomposition.
        redux.resize(
            spec.max_redux - plan.redux.len(),
            ReduxSlot {
                len: 1,
                ..Default::default()
            },
        );
        redux.extend(plan.redux.iter().map(|r| ReduxSlot {
            len: r.len as u64,
            src_stride: r.src_stride as i64,
        }));

        Self {
            src: plan.src_base,
            dst: plan.dst_base,
            idx: plan.idx_base,
            m: plan.m as u64,
            n: plan.n as u64,
            threads_per_red: shape.threads_per_red,
            free,
            redux,
        }
    }
}

/// Interface to the device context collaborator
///
/// Implementations provide buffer management, a source-to-binary compiler,
/// and kernel submission. `compile` returns the live kernel plus the binary
/// the cache persists; `load_binary` is the read side of that round-trip
/// (`Ok(None)` means the binary does not fit this context and must be
/// recompiled).
pub trait ReduceContext: Send + Sync + 'static {
    /// A compiled, launchable kernel
    type Kernel: Send + Sync + 'static;

    /// Threads per warp on this device
    fn warp_size(&self) -> u32;

    /// Maximum threads per block on this device
    fn max_block_size(&self) -> u32;

    /// Architecture tag qualifying compiled binaries (part of cache keys)
    fn arch_tag(&self) -> String;

    /// Allocate a device buffer, returning its pointer
    fn alloc(&self, size_bytes: usize) -> Result<u64>;

    /// Free a device buffer
    fn free(&self, ptr: u64);

    /// Fill a buffer with a repeated byte
    fn memset(&self, ptr: u64, value: u8, size_bytes: usize) -> Result<()>;

    /// Copy host bytes into device memory
    fn write(&self, dst: u64, data: &[u8]) -> Result<()>;

    /// Copy device memory into host bytes
    fn read(&self, src: u64, out: &mut [u8]) -> Result<()>;

    /// Compile generated kernel source for this device
    fn compile(&self, spec: &KernelSpec, source: &str) -> Result<(Self::Kernel, Vec<u8>)>;

    /// Rehydrate a kernel from a cached binary
    fn load_binary(&self, spec: &KernelSpec, binary: &[u8]) -> Result<Option<Self::Kernel>>;

    /// Submit a kernel launch; returns once the submission is accepted
    fn launch(&self, kernel: &Self::Kernel, shape: &LaunchShape, args: &KernelArgs) -> Result<()>;
}
