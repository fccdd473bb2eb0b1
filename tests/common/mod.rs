//! Shared test fixtures: the PCG data generator the scenarios seed with,
//! and a small harness around the host backend.

#![allow(dead_code)]

use ndreduce::engine::ReduceEngine;
use ndreduce::runtime::cpu::CpuContext;
use ndreduce::runtime::ReduceContext;
use std::sync::Arc;

/// PCG XSH-RR 64/32 generator (LCG state, xorshift + rotate output)
///
/// Reference data for every scenario is produced from seed 1, so results
/// are reproducible across runs and platforms.
pub struct Pcg {
    state: u64,
}

impl Pcg {
    pub const MULTIPLIER: u64 = 6364136223846793005;
    pub const INCREMENT: u64 = 1442695040888963407;

    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        let s = self.state;
        let x = ((s ^ (s >> 18)) >> 27) as u32;
        x.rotate_right((s >> 59) as u32)
    }

    /// Uniform double in [0, 1) from two 32-bit draws
    pub fn rand01(&mut self) -> f64 {
        let hi = self.next_u32() as u64;
        let lo = self.next_u32() as u64;
        ((hi << 32) | lo) as f64 / 18446744073709551616.0
    }
}

/// Host-backend engine plus raw-buffer helpers
pub struct Fixture {
    pub ctx: Arc<CpuContext>,
    pub engine: ReduceEngine<CpuContext>,
}

impl Fixture {
    pub fn new() -> Self {
        let ctx = Arc::new(CpuContext::new());
        Self {
            engine: ReduceEngine::with_cache_dir(ctx.clone(), None),
            ctx,
        }
    }

    /// Allocate and upload a typed slice
    pub fn upload<T: bytemuck::Pod>(&self, data: &[T]) -> u64 {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let ptr = self.ctx.alloc(bytes.len()).unwrap();
        self.ctx.write(ptr, bytes).unwrap();
        ptr
    }

    /// Allocate `count` elements of `T`, pre-filled with the 0xFF sentinel
    /// the scenarios use to prove destinations are overwritten
    pub fn alloc_sentinel<T: bytemuck::Pod>(&self, count: usize) -> u64 {
        let bytes = count * std::mem::size_of::<T>();
        let ptr = self.ctx.alloc(bytes.max(1)).unwrap();
        self.ctx.memset(ptr, 0xFF, bytes).unwrap();
        ptr
    }

    /// Read back `count` elements of `T`
    pub fn download<T: bytemuck::Pod + bytemuck::Zeroable>(
        &self,
        ptr: u64,
        count: usize,
    ) -> Vec<T> {
        let mut out = vec![T::zeroed(); count];
        self.ctx.read(ptr, bytemuck::cast_slice_mut(&mut out)).unwrap();
        out
    }
}

// ---------------------------------------------------------------------------
// Input recipes (all seeded with 1)
// ---------------------------------------------------------------------------

/// Uniform [0, 1) floats
pub fn rand01_vec(n: usize) -> Vec<f32> {
    let mut pcg = Pcg::new(1);
    (0..n).map(|_| pcg.rand01() as f32).collect()
}

/// Values near 1 with ~10% zeros (exercises zero substitution)
pub fn prodnz_vec(n: usize) -> Vec<f32> {
    let mut pcg = Pcg::new(1);
    (0..n)
        .map(|_| {
            let v = ((pcg.rand01() - 0.5) * 0.1 + 1.0) as f32;
            if pcg.rand01() < 0.1 {
                0.0
            } else {
                v
            }
        })
        .collect()
}

/// Heavily-saturated words (bits mostly 1) for AND
pub fn and_vec(n: usize) -> Vec<u32> {
    let mut pcg = Pcg::new(1);
    let draw = |pcg: &mut Pcg| (pcg.rand01() * u32::MAX as f64) as u32;
    (0..n)
        .map(|_| {
            let mut v = draw(&mut pcg);
            for _ in 0..4 {
                v |= draw(&mut pcg);
            }
            v
        })
        .collect()
}

/// Sparse words (bits mostly 0) for OR
pub fn or_vec(n: usize) -> Vec<u32> {
    let mut pcg = Pcg::new(1);
    let draw = |pcg: &mut Pcg| (pcg.rand01() * u32::MAX as f64) as u32;
    (0..n)
        .map(|_| {
            let mut v = draw(&mut pcg);
            for _ in 0..4 {
                v &= draw(&mut pcg);
            }
            v
        })
        .collect()
}

/// Uniform words for XOR
pub fn xor_vec(n: usize) -> Vec<u32> {
    let mut pcg = Pcg::new(1);
    (0..n).map(|_| (pcg.rand01() * u32::MAX as f64) as u32).collect()
}

/// Mostly-zero indicator values for ANY
pub fn any_vec(n: usize) -> Vec<u32> {
    let mut pcg = Pcg::new(1);
    (0..n).map(|_| u32::from(pcg.rand01() < 0.05)).collect()
}

/// Mostly-one indicator values for ALL
pub fn all_vec(n: usize) -> Vec<u32> {
    let mut pcg = Pcg::new(1);
    (0..n).map(|_| u32::from(pcg.rand01() > 0.05)).collect()
}
