//! Per-context cache of compiled kernels.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use kn_tensor::Result;
use tracing::{debug, trace};

use crate::device::AccelDevice;
use crate::kernel::KernelSpec;

struct CachedKernel<D: AccelDevice> {
    kernel: D::Kernel,
    // Some bindings require the program to outlive kernels taken from it.
    _program: D::Program,
}

/// Compiled kernels keyed by their full [`KernelSpec`].
///
/// Owned by a single context and dropped with it.
pub struct KernelCache<D: AccelDevice> {
    entries: HashMap<KernelSpec, CachedKernel<D>>,
    hits: usize,
    misses: usize,
}

impl<D: AccelDevice> KernelCache<D> {
    pub fn new() -> Self {
        KernelCache {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Return the kernel for `spec`, generating and compiling it on first use.
    pub fn get_or_compile(&mut self, device: &mut D, spec: KernelSpec) -> Result<&D::Kernel> {
        match self.entries.entry(spec) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                trace!(?spec, "kernel cache hit");
                Ok(&entry.into_mut().kernel)
            }
            Entry::Vacant(slot) => {
                self.misses += 1;
                let program = spec.generate(device.dialect());
                debug!(?spec, dialect = ?program.dialect, "compiling kernel");
                let compiled = device.compile_program(&program)?;
                let kernel = device.entry_point(&compiled, program.entry_point)?;
                let cached = slot.insert(CachedKernel {
                    kernel,
                    _program: compiled,
                });
                Ok(&cached.kernel)
            }
        }
    }

    pub fn contains(&self, spec: &KernelSpec) -> bool {
        self.entries.contains_key(spec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<D: AccelDevice> Default for KernelCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: AccelDevice> fmt::Debug for KernelCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCache")
            .field("specs", &self.entries.keys().collect::<Vec<_>>())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}
