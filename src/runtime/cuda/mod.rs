//! CUDA backend
//!
//! Owns a cudarc context and stream. Kernel source is compiled at runtime
//! through NVRTC on first use of a signature; the persisted cache artifact
//! is the kernel source itself. NVRTC recompilation on reload costs
//! milliseconds and avoids tying cache files to a driver's PTX layout;
//! the cache key still carries the architecture tag, so distinct devices
//! never share entries.
//!
//! Memory traffic uses stream-ordered driver calls on raw `u64` device
//! pointers; launches push the flattened argument list in the order the
//! generated kernel signature declares.

use crate::codegen::KernelSpec;
use crate::error::{Error, Result};
use crate::plan::LaunchShape;
use crate::runtime::{KernelArgs, ReduceContext};

use cudarc::driver::safe::{CudaContext as CudarcContext, CudaFunction, CudaModule, CudaStream};
use cudarc::driver::sys;
use cudarc::driver::{LaunchConfig, PushKernelArg};
use cudarc::nvrtc::compile_ptx;
use std::sync::Arc;

/// CUDA implementation of the device context interface
pub struct CudaContext {
    context: Arc<CudarcContext>,
    stream: Arc<CudaStream>,
    warp_size: u32,
    max_block_size: u32,
    arch: String,
}

/// A compiled reduction kernel resident on the device
pub struct CudaKernel {
    spec: KernelSpec,
    // The function borrows from the module; keep both alive together.
    _module: Arc<CudaModule>,
    func: CudaFunction,
}

impl CudaContext {
    /// Create a context on the given device ordinal
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudarcContext::new(ordinal)
            .map_err(|e| Error::Internal(format!("failed to acquire CUDA device {ordinal}: {e:?}")))?;
        let stream = context.default_stream();

        let attr = |a: sys::CUdevice_attribute| -> Result<i32> {
            context
                .attribute(a)
                .map_err(|e| Error::Internal(format!("device attribute query failed: {e:?}")))
        };
        let warp_size = attr(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE)? as u32;
        let max_block_size =
            attr(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)? as u32;
        let major =
            attr(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
        let minor =
            attr(sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;

        Ok(Self {
            context,
            stream,
            warp_size,
            max_block_size,
            arch: format!("sm_{major}{minor}"),
        })
    }

    fn compile_source(&self, spec: &KernelSpec, source: &str) -> Result<CudaKernel> {
        let name = spec.kernel_name();
        log::debug!("nvrtc: compiling '{}'", name);

        let ptx = compile_ptx(source).map_err(|e| Error::CompileFail {
            kernel: name.clone(),
            reason: format!("{e:?}"),
        })?;

        let module = self.context.load_module(ptx).map_err(|e| Error::CompileFail {
            kernel: name.clone(),
            reason: format!("module load failed: {e:?}"),
        })?;

        let func = module.load_function(&name).map_err(|e| Error::CompileFail {
            kernel: name.clone(),
            reason: format!("entry point missing: {e:?}"),
        })?;

        Ok(CudaKernel {
            spec: spec.clone(),
            _module: module,
            func,
        })
    }
}

impl ReduceContext for CudaContext {
    type Kernel = CudaKernel;

    fn warp_size(&self) -> u32 {
        self.warp_size
    }

    fn max_block_size(&self) -> u32 {
        self.max_block_size
    }

    fn arch_tag(&self) -> String {
        self.arch.clone()
    }

    fn alloc(&self, size_bytes: usize) -> Result<u64> {
        if size_bytes == 0 {
            return Ok(0);
        }
        unsafe {
            let mut ptr: u64 = 0;
            let result = sys::cuMemAllocAsync(&mut ptr, size_bytes, self.stream.cu_stream());
            if result == sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }
            // Flush pending frees and retry once.
            let _ = self.stream.synchronize();
            let result = sys::cuMemAllocAsync(&mut ptr, size_bytes, self.stream.cu_stream());
            if result == sys::CUresult::CUDA_SUCCESS {
                return Ok(ptr);
            }
            Err(Error::DeviceAlloc { size: size_bytes })
        }
    }

    fn free(&self, ptr: u64) {
        if ptr == 0 {
            return;
        }
        unsafe {
            let result = sys::cuMemFreeAsync(ptr, self.stream.cu_stream());
            if result != sys::CUresult::CUDA_SUCCESS {
                log::warn!("[ndreduce::cuda] cuMemFree failed for ptr {ptr:#x}: {result:?}");
            }
        }
    }

    fn memset(&self, ptr: u64, value: u8, size_bytes: usize) -> Result<()> {
        if size_bytes == 0 {
            return Ok(());
        }
        unsafe {
            let result =
                sys::cuMemsetD8Async(ptr, value, size_bytes, self.stream.cu_stream());
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Internal(format!(
                    "CUDA memset of {size_bytes} bytes failed: {result:?}"
                )));
            }
        }
        Ok(())
    }

    fn write(&self, dst: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            let result = sys::cuMemcpyHtoDAsync_v2(
                dst,
                data.as_ptr() as *const std::ffi::c_void,
                data.len(),
                self.stream.cu_stream(),
            );
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Internal(format!(
                    "CUDA host-to-device copy of {} bytes failed: {result:?}",
                    data.len()
                )));
            }
            let _ = self.stream.synchronize();
        }
        Ok(())
    }

    fn read(&self, src: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        unsafe {
            let result = sys::cuMemcpyDtoHAsync_v2(
                out.as_mut_ptr() as *mut std::ffi::c_void,
                src,
                out.len(),
                self.stream.cu_stream(),
            );
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::Internal(format!(
                    "CUDA device-to-host copy of {} bytes failed: {result:?}",
                    out.len()
                )));
            }
            let _ = self.stream.synchronize();
        }
        Ok(())
    }

    fn compile(&self, spec: &KernelSpec, source: &str) -> Result<(Self::Kernel, Vec<u8>)> {
        let kernel = self.compile_source(spec, source)?;
        Ok((kernel, source.as_bytes().to_vec()))
    }

    fn load_binary(&self, spec: &KernelSpec, binary: &[u8]) -> Result<Option<Self::Kernel>> {
        let Ok(source) = std::str::from_utf8(binary) else {
            return Ok(None);
        };
        // A cached artifact must declare the expected entry point; anything
        // else is a stale or foreign file.
        if !source.contains(&spec.kernel_name()) {
            return Ok(None);
        }
        self.compile_source(spec, source).map(Some)
    }

    fn launch(&self, kernel: &Self::Kernel, shape: &LaunchShape, args: &KernelArgs) -> Result<()> {
        let spec = &kernel.spec;
        let writes_value = spec.op.writes_value();
        let tracks_index = spec.idx_dtype.is_some();
        debug_assert_eq!(args.free.len(), spec.max_free);
        debug_assert_eq!(args.redux.len(), spec.max_redux);

        let cfg = LaunchConfig {
            grid_dim: (shape.grid, 1, 1),
            block_dim: (shape.block, 1, 1),
            shared_mem_bytes: shape.shmem_bytes,
        };

        let mut builder = self.stream.launch_builder(&kernel.func);
        builder.arg(&args.src);
        if writes_value {
            builder.arg(&args.dst);
        }
        if tracks_index {
            builder.arg(&args.idx);
        }
        builder.arg(&args.m);
        builder.arg(&args.n);
        builder.arg(&args.threads_per_red);
        for slot in &args.free {
            builder.arg(&slot.len);
            builder.arg(&slot.src_stride);
            if writes_value {
                builder.arg(&slot.dst_stride);
            }
            if tracks_index {
                builder.arg(&slot.idx_stride);
            }
        }
        for slot in &args.redux {
            builder.arg(&slot.len);
            builder.arg(&slot.src_stride);
        }

        // Safety: the argument list above matches the generated kernel
        // signature field for field.
        unsafe { builder.launch(cfg) }.map_err(|e| Error::LaunchFail {
            reason: format!("{e:?}"),
        })?;

        Ok(())
    }
}
