//! Launch configuration for reduction kernels
//!
//! Splits the planned workload across blocks, warps, and threads. The rules:
//! fibres shorter than a warp get one thread each (several fibres share a
//! warp); fibres shorter than a block get one warp each; longer fibres get
//! the whole block plus a shared-memory stage between warps.

use crate::error::{Error, Result};

/// Threads per block (256 is a good default on every recent GPU)
pub const BLOCK_SIZE: u32 = 256;

/// Grid/block split chosen for one launch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchShape {
    /// Number of blocks
    pub grid: u32,
    /// Threads per block
    pub block: u32,
    /// Threads cooperating on one fibre (1, warp, or the full block)
    pub threads_per_red: u32,
    /// Dynamic shared memory per block; the generated kernels declare their
    /// inter-warp scratch statically, so this stays 0
    pub shmem_bytes: u32,
}

impl LaunchShape {
    /// Fibres handled concurrently by one block
    #[inline]
    pub fn reductions_per_block(&self) -> u32 {
        self.block / self.threads_per_red
    }
}

/// Choose the launch shape for `m` fibres of length `n`
///
/// Invariant relied on by the generated kernels: `threads_per_red` is 1 or a
/// multiple of the warp size, and never exceeds `n` unless it is 1, so every
/// cooperating thread owns at least one element.
pub fn configure(m: usize, n: usize, warp_size: u32, max_block_size: u32) -> Result<LaunchShape> {
    debug_assert!(m > 0 && n > 0, "empty reductions never reach the launcher");

    let block = BLOCK_SIZE.clamp(warp_size, max_block_size.max(warp_size));

    let threads_per_red = if n < warp_size as usize {
        1
    } else if n < block as usize {
        warp_size
    } else {
        block
    };

    let rpb = (block / threads_per_red) as usize;
    let grid = m.div_ceil(rpb);
    if grid > i32::MAX as usize {
        return Err(Error::LaunchFail {
            reason: format!("grid of {} blocks exceeds the device limit", grid),
        });
    }

    Ok(LaunchShape {
        grid: grid as u32,
        block,
        threads_per_red,
        shmem_bytes: 0,
    })
}
