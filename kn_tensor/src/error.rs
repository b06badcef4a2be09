//! Error type shared by graph construction and evaluation.

use thiserror::Error;

use crate::buffer::ElementKind;
use crate::node::OpKind;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KnumError>;

/// Everything that can go wrong while building or evaluating a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KnumError {
    /// A shape with no axes or a zero extent.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Operand or buffer geometry disagrees with what the operation needs.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Operation only defined for a specific rank.
    #[error("{op:?} supports rank {expected} only, got rank {actual}")]
    UnsupportedRank {
        op: OpKind,
        expected: usize,
        actual: usize,
    },

    /// No context in the delegation chain implements this operator for the kind.
    #[error("{op:?} is not implemented for {kind:?} elements")]
    UnsupportedOperation { op: OpKind, kind: ElementKind },

    /// Coordinate outside the bounds of a shape or view.
    #[error("index {coords:?} out of range for extents {extents:?}")]
    IndexOutOfRange {
        coords: Vec<usize>,
        extents: Vec<usize>,
    },

    /// Element kind tag did not match the requested kind.
    #[error("expected {expected:?} elements, found {actual:?}")]
    TypeMismatch {
        expected: ElementKind,
        actual: ElementKind,
    },

    /// Integer division with a zero divisor.
    #[error("integer division by zero at element {index}")]
    DivisionByZero { index: usize },

    /// Failure reported by an accelerator device.
    #[error("device error: {0}")]
    Device(String),
}
