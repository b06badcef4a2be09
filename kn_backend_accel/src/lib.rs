//! # kn_backend_accel - Accelerator Adapter for kn_tensor
//!
//! Runs Float binary operations and conv2d as generated kernels on a compute
//! device and evaluates everything else with the host reference engine.
//!
//! ## Overview
//!
//! - [`AccelDevice`] - the binding contract (buffers, programs, dispatch)
//! - [`KernelSpec`] - code-affecting kernel parameters; generates MSL or OpenCL C
//! - [`KernelCache`] - per-context compiled kernels keyed by `KernelSpec`
//! - [`AccelContext`] - the [`ComputeContext`](kn_tensor::ComputeContext) implementation
//! - [`SoftDevice`] - host-memory device that interprets kernel specs
//! - `MetalDevice` - Apple GPU binding (feature `metal`, macOS only)
//!
//! ## Example
//!
//! ```ignore
//! use kn_backend_accel::{AccelContext, SoftDevice};
//! use kn_tensor::prelude::*;
//!
//! let mut ctx = AccelContext::new(SoftDevice::new());
//! let x = Tensor::from_f32s(vec![1.0, 2.0, 3.0, 4.0, 5.0])?;
//! assert_eq!(ctx.evaluate_f32s(&x.mul_scalar(10.0)?)?, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
//! ```

pub mod cache;
pub mod context;
pub mod device;
pub mod kernel;
pub mod soft;

#[cfg(all(feature = "metal", target_os = "macos"))]
mod metal_device;

pub use cache::KernelCache;
pub use context::{AccelContext, AccelOptions, AccelStats, AccelStorage};
pub use device::{AccelDevice, DeviceBuffer, DeviceError, DeviceResult, Dialect, WorkShape};
pub use kernel::{KernelProgram, KernelSpec, ENTRY_POINT};
pub use soft::{SoftDevice, SoftMonitor, SoftStats};

#[cfg(all(feature = "metal", target_os = "macos"))]
pub use metal_device::{MetalBuffer, MetalDevice};
