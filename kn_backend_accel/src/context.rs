//! [`ComputeContext`] over an [`AccelDevice`].

use std::sync::Arc;

use kn_backend_cpu::{reference, CpuContext};
use kn_tensor::prelude::*;
use tracing::{debug, trace};

use crate::cache::KernelCache;
use crate::device::{AccelDevice, DeviceBuffer};
use crate::kernel::KernelSpec;

/// Where a materialized value lives.
#[derive(Debug)]
pub enum AccelStorage<B> {
    Host(HostBuffer),
    Device(Arc<B>),
}

impl<B> Clone for AccelStorage<B> {
    fn clone(&self) -> Self {
        match self {
            AccelStorage::Host(h) => AccelStorage::Host(h.clone()),
            AccelStorage::Device(b) => AccelStorage::Device(Arc::clone(b)),
        }
    }
}

impl<B> AccelStorage<B> {
    pub fn is_device(&self) -> bool {
        matches!(self, AccelStorage::Device(_))
    }
}

impl<B: DeviceBuffer> Storage for AccelStorage<B> {
    fn kind(&self) -> ElementKind {
        match self {
            AccelStorage::Host(h) => h.kind(),
            AccelStorage::Device(b) => b.kind(),
        }
    }

    fn len(&self) -> usize {
        match self {
            AccelStorage::Host(h) => h.len(),
            AccelStorage::Device(b) => b.len(),
        }
    }

    fn to_host(&self) -> Result<HostBuffer> {
        match self {
            AccelStorage::Host(h) => Ok(h.clone()),
            AccelStorage::Device(b) => Ok(b.read()?),
        }
    }
}

/// Which operator families run on the device.
///
/// Disabled families are evaluated by the host reference engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelOptions {
    pub accelerate_binary: bool,
    pub accelerate_conv2d: bool,
}

impl Default for AccelOptions {
    fn default() -> Self {
        AccelOptions {
            accelerate_binary: true,
            accelerate_conv2d: true,
        }
    }
}

impl AccelOptions {
    pub fn accelerate_binary(mut self, enabled: bool) -> Self {
        self.accelerate_binary = enabled;
        self
    }

    pub fn accelerate_conv2d(mut self, enabled: bool) -> Self {
        self.accelerate_conv2d = enabled;
        self
    }

    /// Run everything on the host.
    pub fn host_only() -> Self {
        AccelOptions {
            accelerate_binary: false,
            accelerate_conv2d: false,
        }
    }
}

/// Work counters of one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelStats {
    pub dispatches: usize,
    /// Host operands uploaded to feed a device kernel.
    pub bridged_uploads: usize,
    /// Device values copied back for a host fallback.
    pub downloads: usize,
    /// Operations evaluated by the reference engine.
    pub fallbacks: usize,
}

type AccelResult<D> = Materialized<AccelStorage<<D as AccelDevice>::Buffer>>;

/// Evaluation context that runs binary and conv2d kernels on a device.
///
/// Operators without a kernel are evaluated by an owned [`CpuContext`]
/// after copying their operands back to the host.
pub struct AccelContext<D: AccelDevice> {
    device: D,
    cache: KernelCache<D>,
    fallback: CpuContext,
    options: AccelOptions,
    stats: AccelStats,
}

impl<D: AccelDevice> AccelContext<D> {
    pub fn new(device: D) -> Self {
        Self::with_options(device, AccelOptions::default())
    }

    pub fn with_options(device: D, options: AccelOptions) -> Self {
        AccelContext {
            device,
            cache: KernelCache::new(),
            fallback: CpuContext::new(),
            options,
            stats: AccelStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn cache(&self) -> &KernelCache<D> {
        &self.cache
    }

    pub fn stats(&self) -> AccelStats {
        self.stats
    }

    pub fn options(&self) -> AccelOptions {
        self.options
    }

    pub fn set_options(&mut self, options: AccelOptions) {
        self.options = options;
    }

    pub fn into_device(self) -> D {
        self.device
    }

    fn on_device(&mut self, value: &AccelResult<D>) -> Result<Arc<D::Buffer>> {
        match value.storage() {
            AccelStorage::Device(b) => Ok(Arc::clone(b)),
            AccelStorage::Host(h) => {
                self.stats.bridged_uploads += 1;
                trace!(shape = %value.shape(), "bridging host operand to device");
                Ok(Arc::new(self.device.upload(h)?))
            }
        }
    }

    fn on_host(&mut self, value: &AccelResult<D>) -> Result<Materialized<HostBuffer>> {
        let data = match value.storage() {
            AccelStorage::Host(h) => h.clone(),
            AccelStorage::Device(b) => {
                self.stats.downloads += 1;
                self.device.download(b)?
            }
        };
        Materialized::new(value.shape().clone(), data)
    }

    fn wrap_host(value: Materialized<HostBuffer>) -> Result<AccelResult<D>> {
        let shape = value.shape().clone();
        Materialized::new(shape, AccelStorage::Host(value.into_storage()))
    }

    fn fallback_with(
        &mut self,
        op: OpKind,
        inputs: &[&AccelResult<D>],
        f: impl FnOnce(&mut CpuContext, &[Materialized<HostBuffer>]) -> Result<Materialized<HostBuffer>>,
    ) -> Result<AccelResult<D>> {
        debug!(?op, "not accelerated, evaluating on host");
        self.stats.fallbacks += 1;
        let host = inputs
            .iter()
            .map(|m| self.on_host(m))
            .collect::<Result<Vec<_>>>()?;
        Self::wrap_host(f(&mut self.fallback, &host)?)
    }

    /// Allocate the output, fetch the kernel and run one blocking dispatch.
    fn run_kernel(
        &mut self,
        spec: KernelSpec,
        inputs: [&D::Buffer; 2],
        shape: Shape,
    ) -> Result<AccelResult<D>> {
        let out = self.device.allocate(ElementKind::Float, shape.num_elements())?;
        let work = spec.work_shape(shape.extents());
        let kernel = self.cache.get_or_compile(&mut self.device, spec)?;
        self.device.dispatch(kernel, &[inputs[0], inputs[1], &out], work)?;
        self.stats.dispatches += 1;
        trace!(?spec, items = work.items, "dispatch complete");
        Materialized::new(shape, AccelStorage::Device(Arc::new(out)))
    }
}

impl<D: AccelDevice> ComputeContext for AccelContext<D> {
    type Storage = AccelStorage<D::Buffer>;

    fn compute_constant(&mut self, constant: &Constant) -> Result<AccelResult<D>> {
        trace!(shape = %constant.shape(), kind = ?constant.kind(), "uploading constant");
        let buffer = self.device.upload(constant.data())?;
        Materialized::new(constant.shape().clone(), AccelStorage::Device(Arc::new(buffer)))
    }

    fn compute_binary_op(
        &mut self,
        op: BinaryOp,
        left: &AccelResult<D>,
        right: &AccelResult<D>,
    ) -> Result<AccelResult<D>> {
        let float = left.kind() == ElementKind::Float && right.kind() == ElementKind::Float;
        if !float || !self.options.accelerate_binary {
            return self.fallback_with(OpKind::Binary(op), &[left, right], |cpu, host| {
                cpu.compute_binary_op(op, &host[0], &host[1])
            });
        }

        let scalar_rhs = right.is_scalar_like();
        if !scalar_rhs && !right.shape().matches(left.shape().extents()) {
            return Err(KnumError::ShapeMismatch(format!(
                "{op:?}: right operand {} is neither {} nor scalar-like",
                right.shape(),
                left.shape()
            )));
        }

        let l = self.on_device(left)?;
        let r = self.on_device(right)?;
        self.run_kernel(
            KernelSpec::Binary { op, scalar_rhs },
            [&*l, &*r],
            left.shape().clone(),
        )
    }

    fn compute_unary_op(&mut self, op: UnaryOp, input: &AccelResult<D>) -> Result<AccelResult<D>> {
        self.fallback_with(OpKind::Unary(op), &[input], |cpu, host| {
            cpu.compute_unary_op(op, &host[0])
        })
    }

    fn compute_pad(
        &mut self,
        input: &AccelResult<D>,
        pads: &AccelResult<D>,
    ) -> Result<AccelResult<D>> {
        self.fallback_with(OpKind::Pad, &[input, pads], |cpu, host| {
            cpu.compute_pad(&host[0], &host[1])
        })
    }

    fn compute_conv2d(
        &mut self,
        input: &AccelResult<D>,
        kernel: &AccelResult<D>,
    ) -> Result<AccelResult<D>> {
        let (w, h) = reference::conv2d_geometry(input.shape(), kernel.shape())?;
        let float = input.kind() == ElementKind::Float && kernel.kind() == ElementKind::Float;
        if !float || !self.options.accelerate_conv2d {
            return self.fallback_with(OpKind::Conv2d, &[input, kernel], |cpu, host| {
                cpu.compute_conv2d(&host[0], &host[1])
            });
        }

        let (ow, oh) = (w - 2, h - 2);
        let data = self.on_device(input)?;
        let weights = self.on_device(kernel)?;
        self.run_kernel(
            KernelSpec::Conv2d {
                in_width: w,
                out_width: ow,
            },
            [&*data, &*weights],
            Shape::new(vec![ow, oh])?,
        )
    }
}

impl<D: AccelDevice + std::fmt::Debug> std::fmt::Debug for AccelContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelContext")
            .field("device", &self.device)
            .field("cache", &self.cache)
            .field("options", &self.options)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    fn soft() -> AccelContext<SoftDevice> {
        AccelContext::new(SoftDevice::new())
    }

    fn padded_block() -> Tensor {
        Tensor::from_f32s(vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .reshape(Shape::new(vec![2, 2]).unwrap())
            .unwrap()
            .pad(&[1, 1])
            .unwrap()
    }

    fn ramp_kernel() -> Tensor {
        Tensor::constant(
            (1..=9).map(|v| v as f32).collect::<Vec<_>>(),
            Shape::new(vec![3, 3]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_constant_lives_on_device() {
        let mut ctx = soft();
        let c = Tensor::from_f32s(vec![1.0, 2.0]).unwrap();
        let out = ctx.evaluate(&c).unwrap();
        assert!(out.storage().is_device());
        assert_eq!(out.as_float_array().unwrap(), vec![1.0, 2.0]);
        assert_eq!(ctx.device().stats().uploads, 1);
    }

    #[test]
    fn test_float_binary_dispatches() {
        let mut ctx = soft();
        let a = Tensor::from_f32s(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_f32s(vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let out = ctx.evaluate(&a.add(&b).unwrap()).unwrap();
        assert!(out.storage().is_device());
        assert_eq!(out.as_float_array().unwrap(), vec![6.0, 8.0, 10.0, 12.0]);

        let stats = ctx.stats();
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.bridged_uploads, 0);
        assert_eq!(stats.fallbacks, 0);
    }

    #[test]
    fn test_host_operand_is_bridged() {
        let mut ctx = soft();
        let a = Tensor::from_f32s(vec![1.0, -2.0, 3.0]).unwrap();
        // Neg falls back to the host, so its result must be uploaded for mul.
        let expr = (-&a).mul_scalar(2.0).unwrap();
        let out = ctx.evaluate(&expr).unwrap();
        assert_eq!(out.as_float_array().unwrap(), vec![-2.0, 4.0, -6.0]);

        let stats = ctx.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.bridged_uploads, 1);
        assert_eq!(stats.dispatches, 1);
    }

    #[test]
    fn test_int_binary_falls_back() {
        let mut ctx = soft();
        let a = Tensor::from_i32s(vec![7, 8, 9]).unwrap();
        let out = ctx.evaluate(&a.sub(&Tensor::scalar_i32(7)).unwrap()).unwrap();
        assert!(!out.storage().is_device());
        assert_eq!(out.as_int_array().unwrap(), vec![0, 1, 2]);
        assert_eq!(ctx.stats().fallbacks, 1);
        assert_eq!(ctx.stats().dispatches, 0);
        assert!(ctx.cache().is_empty());
    }

    #[test]
    fn test_pad_and_conv2d() {
        let mut ctx = soft();
        let conv = padded_block().conv2d(&ramp_kernel()).unwrap();
        let out = ctx.evaluate(&conv).unwrap();
        assert_eq!(out.shape().extents(), &[2, 2]);
        assert_eq!(out.as_float_array().unwrap(), vec![77.0, 67.0, 47.0, 37.0]);

        let stats = ctx.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.dispatches, 1);
        assert!(ctx.cache().contains(&KernelSpec::Conv2d {
            in_width: 4,
            out_width: 2,
        }));
    }

    #[test]
    fn test_conv2d_errors_match_reference() {
        let mut ctx = soft();
        let x = Tensor::constant(vec![0.0f32; 16], Shape::new(vec![4, 4]).unwrap()).unwrap();
        let k = Tensor::constant(vec![0.0f32; 4], Shape::new(vec![2, 2]).unwrap()).unwrap();
        assert!(matches!(
            ctx.evaluate(&x.conv2d(&k).unwrap()),
            Err(KnumError::ShapeMismatch(_))
        ));

        let xi = Tensor::constant(vec![0i32; 16], Shape::new(vec![4, 4]).unwrap()).unwrap();
        let ki = Tensor::constant(vec![0i32; 9], Shape::new(vec![3, 3]).unwrap()).unwrap();
        assert_eq!(
            ctx.evaluate(&xi.conv2d(&ki).unwrap()).unwrap_err(),
            KnumError::UnsupportedOperation {
                op: OpKind::Conv2d,
                kind: ElementKind::Int,
            }
        );
        assert_eq!(ctx.stats().dispatches, 0);
    }

    #[test]
    fn test_options_disable_acceleration() {
        let options = AccelOptions::default()
            .accelerate_binary(false)
            .accelerate_conv2d(false);
        let mut ctx = AccelContext::with_options(SoftDevice::new(), options);
        let conv = padded_block()
            .conv2d(&ramp_kernel())
            .unwrap()
            .add_scalar(1.0)
            .unwrap();
        let out = ctx.evaluate(&conv).unwrap();
        assert_eq!(out.as_float_array().unwrap(), vec![78.0, 68.0, 48.0, 38.0]);
        assert_eq!(ctx.stats().dispatches, 0);
        assert_eq!(ctx.stats().fallbacks, 3);
        assert_eq!(ctx.options(), AccelOptions::host_only());
    }

    #[test]
    fn test_set_options_between_evaluations() {
        let mut ctx = soft();
        let g = Tensor::from_f32s(vec![1.0, 2.0]).unwrap().mul_scalar(4.0).unwrap();
        assert_eq!(ctx.evaluate_f32s(&g).unwrap(), vec![4.0, 8.0]);
        assert_eq!(ctx.stats().dispatches, 1);

        ctx.set_options(AccelOptions::host_only());
        assert_eq!(ctx.evaluate_f32s(&g).unwrap(), vec![4.0, 8.0]);
        assert_eq!(ctx.stats().dispatches, 1);
        assert_eq!(ctx.stats().fallbacks, 1);
        assert_eq!(ctx.stats().downloads, 2);
    }

    #[test]
    fn test_into_device_returns_the_binding() {
        let mut ctx = soft();
        let a = Tensor::from_f32s(vec![1.0, 2.0, 3.0]).unwrap();
        ctx.evaluate(&a.add(&a).unwrap()).unwrap();
        let device = ctx.into_device();
        let stats = device.stats();
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.programs_compiled, 1);
        assert_eq!(stats.live_buffers, 0);
    }

    #[test]
    fn test_reshape_keeps_device_buffer() {
        let mut ctx = soft();
        let a = Tensor::from_f32s(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let r = a.mul_scalar(3.0).unwrap().reshape(Shape::new(vec![2, 2]).unwrap()).unwrap();
        let out = ctx.evaluate(&r).unwrap();
        assert!(out.storage().is_device());
        assert_eq!(out.shape().extents(), &[2, 2]);
        assert_eq!(out.as_float_array().unwrap(), vec![3.0, 6.0, 9.0, 12.0]);
    }
}
