//! # kn_tensor - Lazy Tensor Expressions with Pluggable Contexts
//!
//! This crate provides an immutable tensor expression graph and the contract
//! that evaluation backends (host reference engine, accelerators) implement.
//!
//! ## Overview
//!
//! The core abstractions are:
//! - [`Shape`] - positive extents, row-major with the first axis fastest
//! - [`HostBuffer`] / [`ElementKind`] - typed host data (Int or Float)
//! - [`Tensor`] - reference-counted handle to a graph node
//! - [`Materialized`] - an evaluated node over backend [`Storage`]
//! - [`ComputeContext`] - trait for backends; `evaluate` dispatches per operator
//!
//! ## Example
//!
//! ```ignore
//! use kn_tensor::prelude::*;
//! use kn_backend_cpu::CpuContext;
//!
//! let x = Tensor::from_f32s(vec![1.0, 2.0, 3.0, 4.0])?;
//! let y = x.reshape(Shape::new(vec![2, 2])?)?.pad(&[1, 1])?;
//!
//! let mut ctx = CpuContext::new();
//! let padded = ctx.evaluate(&y)?.as_float_array()?;
//! ```

pub mod buffer;
pub mod context;
pub mod error;
pub mod node;
pub mod result;
pub mod shape;
pub mod transfer;

pub use buffer::{ElementKind, HostBuffer};
pub use context::ComputeContext;
pub use error::{KnumError, Result};
pub use node::{BinaryOp, Constant, Node, NodeId, OpKind, Operation, Tensor, UnaryOp};
pub use result::{Materialized, Storage};
pub use shape::Shape;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::{ElementKind, HostBuffer};
    pub use crate::context::ComputeContext;
    pub use crate::error::{KnumError, Result};
    pub use crate::node::{BinaryOp, Constant, Node, NodeId, OpKind, Operation, Tensor, UnaryOp};
    pub use crate::result::{Materialized, Storage};
    pub use crate::shape::Shape;
}
