//! Host-memory reference engine for kn_tensor graphs.
//!
//! [`CpuContext`] evaluates every operator on plain host buffers. The
//! algorithms live in [`reference`] so accelerator contexts can fall back to
//! exactly the same arithmetic.

use kn_tensor::prelude::*;
use tracing::trace;

pub mod reference;

/// Reference evaluation context. Stateless.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuContext;

impl CpuContext {
    pub fn new() -> Self {
        CpuContext
    }
}

impl ComputeContext for CpuContext {
    type Storage = HostBuffer;

    fn compute_constant(&mut self, constant: &Constant) -> Result<Materialized<HostBuffer>> {
        trace!(shape = %constant.shape(), kind = ?constant.kind(), "materializing constant");
        Materialized::new(constant.shape().clone(), constant.data().clone())
    }

    fn compute_binary_op(
        &mut self,
        op: BinaryOp,
        left: &Materialized<HostBuffer>,
        right: &Materialized<HostBuffer>,
    ) -> Result<Materialized<HostBuffer>> {
        reference::binary_op(op, left, right)
    }

    fn compute_unary_op(
        &mut self,
        op: UnaryOp,
        input: &Materialized<HostBuffer>,
    ) -> Result<Materialized<HostBuffer>> {
        reference::unary_op(op, input)
    }

    fn compute_pad(
        &mut self,
        input: &Materialized<HostBuffer>,
        pads: &Materialized<HostBuffer>,
    ) -> Result<Materialized<HostBuffer>> {
        reference::pad(input, pads)
    }

    fn compute_conv2d(
        &mut self,
        input: &Materialized<HostBuffer>,
        kernel: &Materialized<HostBuffer>,
    ) -> Result<Materialized<HostBuffer>> {
        reference::conv2d(input, kernel)
    }
}
