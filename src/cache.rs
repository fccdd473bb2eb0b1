//! Process-wide kernel cache
//!
//! Two layers: an in-memory map (concurrent readers, serialised writers)
//! holding live backend kernels, and an optional on-disk layer holding the
//! backend's compiled binaries so later processes skip compilation. The disk
//! directory comes from `NDREDUCE_CACHE_DIR`; one file per cache key, named
//! by the SHA-256 of the key string. Disk failures are logged and never
//! fatal; the engine simply recompiles.
//!
//! Eviction is deliberately absent: cache files are flat and individually
//! evictable by an external maintenance job.

use crate::codegen::{self, KernelSpec};
use crate::error::Result;
use crate::runtime::ReduceContext;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Environment variable selecting the on-disk cache directory
pub const CACHE_DIR_ENV: &str = "NDREDUCE_CACHE_DIR";

/// Kernel cache for one backend kernel type
pub struct KernelCache<K> {
    kernels: RwLock<HashMap<String, Arc<K>>>,
    disk_dir: Option<PathBuf>,
}

impl<K> KernelCache<K> {
    /// Cache with the disk layer configured from the environment
    pub fn new() -> Self {
        Self::with_dir(std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from))
    }

    /// Cache with an explicit disk directory (`None` disables the layer)
    pub fn with_dir(disk_dir: Option<PathBuf>) -> Self {
        Self {
            kernels: RwLock::new(HashMap::new()),
            disk_dir,
        }
    }

    /// Number of live kernels
    pub fn len(&self) -> usize {
        self.kernels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when no kernel has been compiled yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.disk_dir.as_ref()?;
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(2 * digest.len() + 4);
        for byte in digest {
            write!(name, "{:02x}", byte).unwrap();
        }
        name.push_str(".bin");
        Some(dir.join(name))
    }

    /// Look up the kernel for a signature, compiling on miss
    ///
    /// Miss path: probe the disk layer first; otherwise generate source,
    /// hand it to the context's compiler, and persist the returned binary.
    pub fn get_or_compile<C>(&self, ctx: &C, spec: &KernelSpec) -> Result<Arc<K>>
    where
        C: ReduceContext<Kernel = K>,
    {
        let key = spec.cache_key(&ctx.arch_tag());

        {
            let map = self.kernels.read().unwrap_or_else(|e| e.into_inner());
            if let Some(kernel) = map.get(&key) {
                return Ok(kernel.clone());
            }
        }

        let path = self.disk_path(&key);
        if let Some(path) = &path {
            if let Ok(binary) = fs::read(path) {
                match ctx.load_binary(spec, &binary) {
                    Ok(Some(kernel)) => {
                        log::debug!("kernel cache: loaded '{}' from {}", key, path.display());
                        return Ok(self.insert(key, kernel));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!(
                            "kernel cache: stale entry {} rejected ({}), recompiling",
                            path.display(),
                            e
                        );
                    }
                }
            }
        }

        log::debug!("kernel cache miss for '{}', generating source", key);
        let source = codegen::generate_source(spec)?;
        let (kernel, binary) = ctx.compile(spec, &source)?;

        if let Some(path) = &path {
            let written = path
                .parent()
                .map(fs::create_dir_all)
                .transpose()
                .and_then(|_| fs::write(path, &binary));
            if let Err(e) = written {
                log::warn!("kernel cache: failed to persist {}: {}", path.display(), e);
            }
        }

        Ok(self.insert(key, kernel))
    }

    fn insert(&self, key: String, kernel: K) -> Arc<K> {
        let mut map = self.kernels.write().unwrap_or_else(|e| e.into_inner());
        // A racing compile may have won; keep the incumbent.
        map.entry(key).or_insert_with(|| Arc::new(kernel)).clone()
    }
}

impl<K> Default for KernelCache<K> {
    fn default() -> Self {
        Self::new()
    }
}
