//! ComputeContext trait - the contract every evaluation backend implements.

use tracing::debug;

use crate::error::Result;
use crate::node::{BinaryOp, Constant, Node, OpKind, Operation, Tensor, UnaryOp};
use crate::result::{Materialized, Storage};

/// Evaluation backend.
///
/// Backends implement one handler per operator category; [`evaluate`] walks
/// the graph bottom-up and dispatches each node to them. Any state a backend
/// keeps between calls (kernel caches, counters) lives in the context value
/// itself, so independent contexts never share it.
///
/// The handlers are required rather than provided: the reference arithmetic
/// lives in `kn_backend_cpu`, which depends on this crate. A backend that
/// accelerates only some operators keeps a `CpuContext` (or calls
/// `kn_backend_cpu::reference`) and delegates the rest to it.
///
/// [`evaluate`]: ComputeContext::evaluate
pub trait ComputeContext {
    /// Where this context keeps materialized data.
    type Storage: Storage;

    /// Materialize a constant leaf.
    fn compute_constant(&mut self, constant: &Constant) -> Result<Materialized<Self::Storage>>;

    /// Elementwise binary operation; `right` may be scalar-like.
    fn compute_binary_op(
        &mut self,
        op: BinaryOp,
        left: &Materialized<Self::Storage>,
        right: &Materialized<Self::Storage>,
    ) -> Result<Materialized<Self::Storage>>;

    /// Elementwise unary operation.
    fn compute_unary_op(
        &mut self,
        op: UnaryOp,
        input: &Materialized<Self::Storage>,
    ) -> Result<Materialized<Self::Storage>>;

    /// Zero padding; `pads` holds one Int amount per axis.
    fn compute_pad(
        &mut self,
        input: &Materialized<Self::Storage>,
        pads: &Materialized<Self::Storage>,
    ) -> Result<Materialized<Self::Storage>>;

    /// Valid 3x3 convolution of a rank-2 input.
    fn compute_conv2d(
        &mut self,
        input: &Materialized<Self::Storage>,
        kernel: &Materialized<Self::Storage>,
    ) -> Result<Materialized<Self::Storage>>;

    /// Evaluate `root` and everything it depends on.
    ///
    /// Nothing is memoized across calls: shared subtrees are recomputed.
    fn evaluate(&mut self, root: &Tensor) -> Result<Materialized<Self::Storage>> {
        match root.node() {
            Node::Constant(constant) => self.compute_constant(constant),
            Node::Operation(op) => {
                debug!(id = ?root.id(), op = ?op.op(), shape = %op.shape(), "evaluating operation");
                self.compute_operation(op)
            }
        }
    }

    /// Dispatch one operation node by its operator tag.
    fn compute_operation(&mut self, op: &Operation) -> Result<Materialized<Self::Storage>> {
        match op.op() {
            OpKind::Reshape => {
                let input = self.evaluate(op.input(0))?;
                input.reshape(op.shape().clone(), op.kind())
            }
            OpKind::Binary(bop) => {
                let left = self.evaluate(op.input(0))?;
                let right = self.evaluate(op.input(1))?;
                self.compute_binary_op(bop, &left, &right)
            }
            OpKind::Unary(uop) => {
                let input = self.evaluate(op.input(0))?;
                self.compute_unary_op(uop, &input)
            }
            OpKind::Pad => {
                let input = self.evaluate(op.input(0))?;
                let pads = self.evaluate(op.input(1))?;
                self.compute_pad(&input, &pads)
            }
            OpKind::Conv2d => {
                let input = self.evaluate(op.input(0))?;
                let kernel = self.evaluate(op.input(1))?;
                self.compute_conv2d(&input, &kernel)
            }
        }
    }

    /// Evaluate and copy the result out as floats.
    fn evaluate_f32s(&mut self, root: &Tensor) -> Result<Vec<f32>> {
        self.evaluate(root)?.as_float_array()
    }

    /// Evaluate and copy the result out as ints.
    fn evaluate_i32s(&mut self, root: &Tensor) -> Result<Vec<i32>> {
        self.evaluate(root)?.as_int_array()
    }
}
