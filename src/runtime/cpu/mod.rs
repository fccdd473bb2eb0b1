//! Host reference backend
//!
//! Serves the same `ReduceContext` interface as a GPU from plain host
//! memory: pointers are real addresses, "compilation" builds an interpreter
//! for the kernel signature, and a launch executes the reduction with
//! semantics identical to the generated device code (same seeding rule,
//! same accumulator widths, same lowest-flat-index tie-break). Every
//! numerical scenario in the test suite runs against this backend.

mod interp;

use crate::codegen::KernelSpec;
use crate::error::{Error, Result};
use crate::plan::LaunchShape;
use crate::runtime::{KernelArgs, ReduceContext};
use std::alloc::{alloc_zeroed, dealloc, Layout as AllocLayout};
use std::collections::HashMap;
use std::sync::Mutex;

/// Allocation alignment (covers every element type and SIMD-width loads)
const ALLOC_ALIGN: usize = 64;

/// Host-memory implementation of the device context interface
pub struct CpuContext {
    /// Live allocations: base pointer -> byte size (needed for dealloc)
    allocs: Mutex<HashMap<u64, usize>>,
}

/// An "compiled" kernel for the host backend: just its static signature,
/// executed by the interpreter at launch time
pub struct CpuKernel {
    spec: KernelSpec,
}

impl CpuContext {
    /// Create a host context
    pub fn new() -> Self {
        Self {
            allocs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpuContext {
    fn drop(&mut self) {
        let allocs = self.allocs.lock().unwrap_or_else(|e| e.into_inner());
        for (&ptr, &size) in allocs.iter() {
            let layout = AllocLayout::from_size_align(size, ALLOC_ALIGN)
                .expect("allocation layout was validated at alloc time");
            unsafe { dealloc(ptr as *mut u8, layout) };
        }
    }
}

impl ReduceContext for CpuContext {
    type Kernel = CpuKernel;

    fn warp_size(&self) -> u32 {
        32
    }

    fn max_block_size(&self) -> u32 {
        1024
    }

    fn arch_tag(&self) -> String {
        "host".to_string()
    }

    fn alloc(&self, size_bytes: usize) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }
        let layout = AllocLayout::from_size_align(size_bytes, ALLOC_ALIGN)
            .map_err(|_| Error::DeviceAlloc { size: size_bytes })?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(Error::DeviceAlloc { size: size_bytes });
        }
        self.allocs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ptr as u64, size_bytes);
        Ok(ptr as u64)
    }

    fn free(&self, ptr: u64) {
        if ptr == 0 {
            return;
        }
        let size = self
            .allocs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ptr);
        if let Some(size) = size {
            let layout = AllocLayout::from_size_align(size, ALLOC_ALIGN)
                .expect("allocation layout was validated at alloc time");
            unsafe { dealloc(ptr as *mut u8, layout) };
        }
    }

    fn memset(&self, ptr: u64, value: u8, size_bytes: usize) -> Result<()> {
        if size_bytes > 0 {
            unsafe { std::ptr::write_bytes(ptr as *mut u8, value, size_bytes) };
        }
        Ok(())
    }

    fn write(&self, dst: u64, data: &[u8]) -> Result<()> {
        if !data.is_empty() {
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len()) };
        }
        Ok(())
    }

    fn read(&self, src: u64, out: &mut [u8]) -> Result<()> {
        if !out.is_empty() {
            unsafe { std::ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), out.len()) };
        }
        Ok(())
    }

    fn compile(&self, spec: &KernelSpec, _source: &str) -> Result<(Self::Kernel, Vec<u8>)> {
        // The host backend runs the signature directly; the "binary" it
        // hands the cache is the signature name, verified on reload.
        let kernel = CpuKernel { spec: spec.clone() };
        Ok((kernel, spec.kernel_name().into_bytes()))
    }

    fn load_binary(&self, spec: &KernelSpec, binary: &[u8]) -> Result<Option<Self::Kernel>> {
        if binary == spec.kernel_name().as_bytes() {
            Ok(Some(CpuKernel { spec: spec.clone() }))
        } else {
            Ok(None)
        }
    }

    fn launch(&self, kernel: &Self::Kernel, _shape: &LaunchShape, args: &KernelArgs) -> Result<()> {
        interp::execute(&kernel.spec, args)
    }
}
