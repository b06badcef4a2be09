//! Element kinds and shared host-memory buffers.

use std::sync::Arc;

use crate::error::{KnumError, Result};

/// Element type tag carried by every node and buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// 32-bit signed integers.
    Int,
    /// 32-bit IEEE floats.
    Float,
}

impl ElementKind {
    /// Width of one element in bytes.
    pub fn size_bytes(self) -> usize {
        4
    }
}

/// Immutable host buffer. Cloning shares the allocation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostBuffer {
    Float(Arc<[f32]>),
    Int(Arc<[i32]>),
}

impl HostBuffer {
    /// Zero-filled buffer of the given kind.
    pub fn zeros(kind: ElementKind, len: usize) -> Self {
        match kind {
            ElementKind::Float => HostBuffer::Float(vec![0.0; len].into()),
            ElementKind::Int => HostBuffer::Int(vec![0; len].into()),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            HostBuffer::Float(_) => ElementKind::Float,
            HostBuffer::Int(_) => ElementKind::Int,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostBuffer::Float(d) => d.len(),
            HostBuffer::Int(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow as floats, failing on an Int buffer.
    pub fn as_f32(&self) -> Result<&[f32]> {
        match self {
            HostBuffer::Float(d) => Ok(d),
            HostBuffer::Int(_) => Err(KnumError::TypeMismatch {
                expected: ElementKind::Float,
                actual: ElementKind::Int,
            }),
        }
    }

    /// Borrow as ints, failing on a Float buffer.
    pub fn as_i32(&self) -> Result<&[i32]> {
        match self {
            HostBuffer::Int(d) => Ok(d),
            HostBuffer::Float(_) => Err(KnumError::TypeMismatch {
                expected: ElementKind::Int,
                actual: ElementKind::Float,
            }),
        }
    }

    /// Fresh copy of the float contents.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        self.as_f32().map(<[f32]>::to_vec)
    }

    /// Fresh copy of the int contents.
    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        self.as_i32().map(<[i32]>::to_vec)
    }

    /// True if both buffers share one allocation.
    pub fn shares_allocation(&self, other: &HostBuffer) -> bool {
        match (self, other) {
            (HostBuffer::Float(a), HostBuffer::Float(b)) => Arc::ptr_eq(a, b),
            (HostBuffer::Int(a), HostBuffer::Int(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Vec<f32>> for HostBuffer {
    fn from(v: Vec<f32>) -> Self {
        HostBuffer::Float(v.into())
    }
}

impl From<Vec<i32>> for HostBuffer {
    fn from(v: Vec<i32>) -> Self {
        HostBuffer::Int(v.into())
    }
}

impl From<&[f32]> for HostBuffer {
    fn from(s: &[f32]) -> Self {
        HostBuffer::Float(s.into())
    }
}

impl From<&[i32]> for HostBuffer {
    fn from(s: &[i32]) -> Self {
        HostBuffer::Int(s.into())
    }
}
