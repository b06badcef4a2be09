//! Materialized (evaluated) tensors.

use std::fmt::Debug;

use crate::buffer::{ElementKind, HostBuffer};
use crate::error::{KnumError, Result};
use crate::shape::Shape;

/// Backing store of a materialized tensor.
///
/// Host contexts store a [`HostBuffer`]; accelerator contexts may keep the
/// data in device memory and only copy it back on request.
pub trait Storage: Clone + Debug {
    /// Element kind of the stored data.
    fn kind(&self) -> ElementKind;

    /// Number of stored elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy (or share) the contents into host memory.
    fn to_host(&self) -> Result<HostBuffer>;
}

impl Storage for HostBuffer {
    fn kind(&self) -> ElementKind {
        HostBuffer::kind(self)
    }

    fn len(&self) -> usize {
        HostBuffer::len(self)
    }

    fn to_host(&self) -> Result<HostBuffer> {
        Ok(self.clone())
    }
}

/// The evaluated value of an expression node.
#[derive(Debug, Clone)]
pub struct Materialized<S: Storage> {
    shape: Shape,
    storage: S,
}

impl<S: Storage> Materialized<S> {
    /// Pair `storage` with `shape`; lengths must agree.
    pub fn new(shape: Shape, storage: S) -> Result<Self> {
        if storage.len() != shape.num_elements() {
            return Err(KnumError::ShapeMismatch(format!(
                "storage of {} elements cannot back shape {}",
                storage.len(),
                shape
            )));
        }
        Ok(Materialized { shape, storage })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn kind(&self) -> ElementKind {
        self.storage.kind()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn is_scalar_like(&self) -> bool {
        self.shape.is_scalar_like()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Same data under a new shape. Never recomputes or copies.
    pub fn reshape(&self, shape: Shape, kind: ElementKind) -> Result<Self> {
        if kind != self.kind() {
            return Err(KnumError::TypeMismatch {
                expected: self.kind(),
                actual: kind,
            });
        }
        if shape.num_elements() != self.num_elements() {
            return Err(KnumError::ShapeMismatch(format!(
                "cannot reshape {} into {}",
                self.shape, shape
            )));
        }
        Ok(Materialized {
            shape,
            storage: self.storage.clone(),
        })
    }

    /// Host-memory view of this value.
    pub fn to_host(&self) -> Result<Materialized<HostBuffer>> {
        Ok(Materialized {
            shape: self.shape.clone(),
            storage: self.storage.to_host()?,
        })
    }

    /// Fresh flat copy of float data.
    pub fn as_float_array(&self) -> Result<Vec<f32>> {
        self.storage.to_host()?.to_f32_vec()
    }

    /// Fresh flat copy of int data.
    pub fn as_int_array(&self) -> Result<Vec<i32>> {
        self.storage.to_host()?.to_i32_vec()
    }
}

impl Materialized<HostBuffer> {
    /// Borrow the host data without copying.
    pub fn host(&self) -> &HostBuffer {
        &self.storage
    }
}
