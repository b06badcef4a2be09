//! Expression graph nodes and the builders that compose them.
//!
//! Nodes never hold evaluated data other than constant leaves. Output shapes
//! and element kinds are inferred when a node is built, so a graph that fails
//! shape inference can never exist.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::{ElementKind, HostBuffer};
use crate::error::{KnumError, Result};
use crate::shape::Shape;

/// Global counter for unique node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Unique identifier for a node in the expression graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u64);

/// Elementwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 6] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Min,
        BinaryOp::Max,
    ];
}

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

/// Operator tag of an [`Operation`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Reshape,
    Pad,
    Conv2d,
}

/// Leaf node owning its data.
#[derive(Debug)]
pub struct Constant {
    shape: Shape,
    data: HostBuffer,
}

impl Constant {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn data(&self) -> &HostBuffer {
        &self.data
    }
}

/// Interior node combining its inputs through an operator.
#[derive(Debug)]
pub struct Operation {
    op: OpKind,
    shape: Shape,
    kind: ElementKind,
    inputs: Vec<Tensor>,
}

impl Operation {
    pub fn op(&self) -> OpKind {
        self.op
    }

    /// Declared output shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Declared output element kind.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn inputs(&self) -> &[Tensor] {
        &self.inputs
    }

    /// Input at `index`; builders guarantee the arity of every operator.
    pub fn input(&self, index: usize) -> &Tensor {
        &self.inputs[index]
    }
}

/// Node payload.
#[derive(Debug)]
pub enum Node {
    Constant(Constant),
    Operation(Operation),
}

struct TensorNode {
    id: NodeId,
    node: Node,
}

/// A tensor expression. Reference-counted and immutable once built.
#[derive(Clone)]
pub struct Tensor(Arc<TensorNode>);

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Tensor");
        s.field("id", &self.0.id);
        match &self.0.node {
            Node::Constant(_) => s.field("op", &"Constant"),
            Node::Operation(op) => s.field("op", &op.op),
        };
        s.field("shape", self.shape()).finish()
    }
}

impl Tensor {
    fn new_node(node: Node) -> Self {
        Tensor(Arc::new(TensorNode {
            id: NodeId(next_node_id()),
            node,
        }))
    }

    fn new_op(op: OpKind, shape: Shape, kind: ElementKind, inputs: Vec<Tensor>) -> Self {
        Self::new_node(Node::Operation(Operation {
            op,
            shape,
            kind,
            inputs,
        }))
    }

    // === Constructors ===

    /// Constant leaf. The buffer length must equal the shape's element count.
    pub fn constant(data: impl Into<HostBuffer>, shape: Shape) -> Result<Self> {
        let data = data.into();
        if data.len() != shape.num_elements() {
            return Err(KnumError::ShapeMismatch(format!(
                "buffer of {} elements cannot fill shape {} ({} elements)",
                data.len(),
                shape,
                shape.num_elements()
            )));
        }
        Ok(Self::new_node(Node::Constant(Constant { shape, data })))
    }

    /// Rank-1 float constant.
    pub fn from_f32s(data: Vec<f32>) -> Result<Self> {
        let shape = Shape::vector(data.len())?;
        Self::constant(data, shape)
    }

    /// Rank-1 int constant.
    pub fn from_i32s(data: Vec<i32>) -> Result<Self> {
        let shape = Shape::vector(data.len())?;
        Self::constant(data, shape)
    }

    /// Single float, broadcastable over any shape.
    pub fn scalar_f32(value: f32) -> Self {
        Self::new_node(Node::Constant(Constant {
            shape: Shape::scalar(),
            data: vec![value].into(),
        }))
    }

    /// Single int, broadcastable over any shape.
    pub fn scalar_i32(value: i32) -> Self {
        Self::new_node(Node::Constant(Constant {
            shape: Shape::scalar(),
            data: vec![value].into(),
        }))
    }

    // === Accessors ===

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn node(&self) -> &Node {
        &self.0.node
    }

    /// Operator tag, `None` for constants.
    pub fn op_kind(&self) -> Option<OpKind> {
        match &self.0.node {
            Node::Constant(_) => None,
            Node::Operation(op) => Some(op.op),
        }
    }

    pub fn shape(&self) -> &Shape {
        match &self.0.node {
            Node::Constant(c) => &c.shape,
            Node::Operation(op) => &op.shape,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match &self.0.node {
            Node::Constant(c) => c.kind(),
            Node::Operation(op) => op.kind,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().num_elements()
    }

    /// Input nodes, empty for constants.
    pub fn inputs(&self) -> &[Tensor] {
        match &self.0.node {
            Node::Constant(_) => &[],
            Node::Operation(op) => &op.inputs,
        }
    }

    /// True if both handles point at the same node.
    pub fn same_node(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // === Binary operations ===

    /// Elementwise `left op right`. `right` must have the same shape as
    /// `left` or be scalar-like, in which case it is broadcast.
    pub fn binary(op: BinaryOp, left: &Tensor, right: &Tensor) -> Result<Self> {
        let (ls, rs) = (left.shape(), right.shape());
        if !rs.matches(ls.extents()) && !rs.is_scalar_like() {
            return Err(KnumError::ShapeMismatch(format!(
                "{op:?}: right operand {rs} is neither {ls} nor scalar-like"
            )));
        }
        if left.kind() != right.kind() {
            return Err(KnumError::TypeMismatch {
                expected: left.kind(),
                actual: right.kind(),
            });
        }
        Ok(Self::new_op(
            OpKind::Binary(op),
            ls.clone(),
            left.kind(),
            vec![left.clone(), right.clone()],
        ))
    }

    pub fn add(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Add, self, other)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Sub, self, other)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Mul, self, other)
    }

    pub fn div(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Div, self, other)
    }

    /// Elementwise minimum.
    pub fn min(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Min, self, other)
    }

    /// Elementwise maximum.
    pub fn max(&self, other: &Tensor) -> Result<Self> {
        Self::binary(BinaryOp::Max, self, other)
    }

    pub fn add_scalar(&self, value: f32) -> Result<Self> {
        self.add(&Self::scalar_f32(value))
    }

    pub fn sub_scalar(&self, value: f32) -> Result<Self> {
        self.sub(&Self::scalar_f32(value))
    }

    pub fn mul_scalar(&self, value: f32) -> Result<Self> {
        self.mul(&Self::scalar_f32(value))
    }

    pub fn div_scalar(&self, value: f32) -> Result<Self> {
        self.div(&Self::scalar_f32(value))
    }

    /// `min(max(self, lo), hi)` with scalar bounds.
    pub fn clamp(&self, lo: f32, hi: f32) -> Result<Self> {
        self.max(&Self::scalar_f32(lo))?.min(&Self::scalar_f32(hi))
    }

    // === Unary operations ===

    /// Negate: -self
    pub fn neg(&self) -> Self {
        Self::new_op(
            OpKind::Unary(UnaryOp::Neg),
            self.shape().clone(),
            self.kind(),
            vec![self.clone()],
        )
    }

    // === Shape operations ===

    /// Reinterpret the row-major data under a new shape with the same element count.
    pub fn reshape(&self, shape: Shape) -> Result<Self> {
        if shape.num_elements() != self.num_elements() {
            return Err(KnumError::ShapeMismatch(format!(
                "cannot reshape {} into {}",
                self.shape(),
                shape
            )));
        }
        Ok(Self::new_op(OpKind::Reshape, shape, self.kind(), vec![self.clone()]))
    }

    /// Zero-pad every axis by `pads[axis]` on both sides.
    ///
    /// The amounts travel as a second, Int constant input.
    pub fn pad(&self, pads: &[usize]) -> Result<Self> {
        if pads.len() != self.rank() {
            return Err(KnumError::ShapeMismatch(format!(
                "{} pad amounts given for rank-{} tensor {}",
                pads.len(),
                self.rank(),
                self.shape()
            )));
        }
        let amounts = pads
            .iter()
            .map(|&p| {
                i32::try_from(p)
                    .map_err(|_| KnumError::InvalidShape(format!("pad amount {p} is too large")))
            })
            .collect::<Result<Vec<_>>>()?;
        let shape = self
            .shape()
            .map(|axis, e| pads[axis].checked_mul(2).and_then(|p| e.checked_add(p)))?;
        let amounts = Self::from_i32s(amounts)?;
        Ok(Self::new_op(OpKind::Pad, shape, self.kind(), vec![self.clone(), amounts]))
    }

    /// Valid (unpadded) convolution with a 3x3 kernel.
    ///
    /// Rank and kernel geometry are checked when the graph is evaluated.
    pub fn conv2d(&self, kernel: &Tensor) -> Result<Self> {
        if self.kind() != kernel.kind() {
            return Err(KnumError::TypeMismatch {
                expected: self.kind(),
                actual: kernel.kind(),
            });
        }
        let shape = self.shape().map(|_, e| e.checked_sub(2))?;
        Ok(Self::new_op(
            OpKind::Conv2d,
            shape,
            self.kind(),
            vec![self.clone(), kernel.clone()],
        ))
    }
}

// === Operator overloads ===

impl std::ops::Neg for &Tensor {
    type Output = Tensor;
    fn neg(self) -> Tensor {
        Tensor::neg(self)
    }
}

impl std::ops::Neg for Tensor {
    type Output = Tensor;
    fn neg(self) -> Tensor {
        Tensor::neg(&self)
    }
}
