//! Device contract: the boundary between the adapter and a native binding.

use std::fmt::Debug;

use kn_tensor::{ElementKind, HostBuffer, KnumError};
use thiserror::Error;

use crate::kernel::KernelProgram;

/// Failure reported by a device binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("kernel compilation failed: {0}")]
    Compile(String),

    #[error("entry point `{0}` not found in compiled program")]
    MissingEntryPoint(String),

    #[error("device allocation failed: {0}")]
    Allocation(String),

    #[error("kernel dispatch failed: {0}")]
    Dispatch(String),

    #[error("host/device transfer failed: {0}")]
    Transfer(String),
}

impl From<DeviceError> for KnumError {
    fn from(err: DeviceError) -> Self {
        KnumError::Device(err.to_string())
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Source language of generated kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Metal Shading Language.
    Msl,
    /// OpenCL C.
    OpenCl,
}

/// One-dimensional global work range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkShape {
    pub items: usize,
}

impl WorkShape {
    pub fn linear(items: usize) -> Self {
        WorkShape { items }
    }
}

/// Device memory holding `len` elements of one kind.
///
/// Dropping the handle releases the allocation.
pub trait DeviceBuffer: Debug {
    fn kind(&self) -> ElementKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking copy of the contents into host memory.
    fn read(&self) -> DeviceResult<HostBuffer>;
}

/// A compute device able to run generated kernels.
///
/// Every handle type owns its native resource and releases it on `Drop`,
/// so an evaluation that fails halfway frees what it acquired as its
/// owners unwind.
pub trait AccelDevice {
    type Buffer: DeviceBuffer;
    type Program;
    type Kernel;

    /// Dialect this device compiles.
    fn dialect(&self) -> Dialect;

    fn upload(&mut self, data: &HostBuffer) -> DeviceResult<Self::Buffer>;

    /// Uninitialized (or zeroed) buffer of `len` elements.
    fn allocate(&mut self, kind: ElementKind, len: usize) -> DeviceResult<Self::Buffer>;

    fn compile_program(&mut self, program: &KernelProgram) -> DeviceResult<Self::Program>;

    fn entry_point(&mut self, program: &Self::Program, name: &str) -> DeviceResult<Self::Kernel>;

    /// Run `kernel` over `work` with positional buffer arguments.
    ///
    /// Returns only once the device has finished the work.
    fn dispatch(
        &mut self,
        kernel: &Self::Kernel,
        args: &[&Self::Buffer],
        work: WorkShape,
    ) -> DeviceResult<()>;

    fn download(&mut self, buffer: &Self::Buffer) -> DeviceResult<HostBuffer> {
        buffer.read()
    }
}
