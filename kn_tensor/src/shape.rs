//! Tensor shapes and the row-major offset convention.
//!
//! The first extent is the fastest-varying axis: the offset of `(c0, c1, c2)`
//! is `c0 + c1 * e0 + c2 * e0 * e1`.

use std::fmt;

use crate::error::{KnumError, Result};

/// An immutable tensor shape (positive extents, rank >= 1).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    extents: Vec<usize>,
    num_elements: usize,
}

impl Shape {
    /// Create a shape from its extents.
    pub fn new(extents: Vec<usize>) -> Result<Self> {
        if extents.is_empty() {
            return Err(KnumError::InvalidShape("shape needs at least one axis".into()));
        }
        if let Some(axis) = extents.iter().position(|&e| e == 0) {
            return Err(KnumError::InvalidShape(format!(
                "extent of axis {axis} must be positive in {extents:?}"
            )));
        }
        let num_elements = extents
            .iter()
            .try_fold(1usize, |acc, &e| acc.checked_mul(e))
            .ok_or_else(|| {
                KnumError::InvalidShape(format!("element count of {extents:?} overflows usize"))
            })?;
        Ok(Shape { extents, num_elements })
    }

    /// Rank-1 shape of `len` elements.
    pub fn vector(len: usize) -> Result<Self> {
        Self::new(vec![len])
    }

    /// The `(1)` shape used for broadcast scalars.
    pub fn scalar() -> Self {
        Shape {
            extents: vec![1],
            num_elements: 1,
        }
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// Extent of a single axis.
    pub fn extent(&self, axis: usize) -> Option<usize> {
        self.extents.get(axis).copied()
    }

    /// All extents, first axis first.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Total number of elements.
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// True for the single-element rank-1 shape, the only broadcastable operand.
    pub fn is_scalar_like(&self) -> bool {
        self.extents.len() == 1 && self.extents[0] == 1
    }

    /// Exact equality by position and count.
    pub fn matches(&self, extents: &[usize]) -> bool {
        self.extents == extents
    }

    /// Row-major offset of `coords`.
    pub fn offset_of(&self, coords: &[usize]) -> Result<usize> {
        let in_bounds = coords.len() == self.extents.len()
            && coords.iter().zip(&self.extents).all(|(c, e)| c < e);
        if !in_bounds {
            return Err(KnumError::IndexOutOfRange {
                coords: coords.to_vec(),
                extents: self.extents.clone(),
            });
        }

        let mut offset = 0;
        let mut stride = 1;
        for (c, e) in coords.iter().zip(&self.extents) {
            offset += c * stride;
            stride *= e;
        }
        Ok(offset)
    }

    /// Shape with every extent mapped through `f`.
    pub(crate) fn map(&self, f: impl Fn(usize, usize) -> Option<usize>) -> Result<Shape> {
        let extents = self
            .extents
            .iter()
            .enumerate()
            .map(|(axis, &e)| {
                f(axis, e).ok_or_else(|| {
                    KnumError::InvalidShape(format!("axis {axis} of {self} cannot be resized"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Shape::new(extents)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.extents)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, e) in self.extents.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        if self.extents.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl TryFrom<Vec<usize>> for Shape {
    type Error = KnumError;

    fn try_from(v: Vec<usize>) -> Result<Self> {
        Shape::new(v)
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = KnumError;

    fn try_from(s: &[usize]) -> Result<Self> {
        Shape::new(s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s.rank(), 3);
        assert_eq!(s.extent(0), Some(2));
        assert_eq!(s.extent(2), Some(4));
        assert_eq!(s.extent(3), None);
        assert_eq!(s.num_elements(), 24);
        assert!(!s.is_scalar_like());
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(Shape::new(vec![]), Err(KnumError::InvalidShape(_))));
        assert!(matches!(Shape::new(vec![2, 0]), Err(KnumError::InvalidShape(_))));
    }

    #[test]
    fn test_shape_element_count_overflow() {
        let huge = 1usize << (usize::BITS / 2 + 1);
        assert!(matches!(
            Shape::new(vec![huge, huge]),
            Err(KnumError::InvalidShape(_))
        ));
        assert!(matches!(
            Shape::new(vec![usize::MAX, 2]),
            Err(KnumError::InvalidShape(_))
        ));
        assert_eq!(Shape::new(vec![usize::MAX, 1]).unwrap().num_elements(), usize::MAX);
    }

    #[test]
    fn test_try_from_extents() {
        let a = Shape::try_from(vec![2, 3]).unwrap();
        let b = Shape::try_from(&[2usize, 3][..]).unwrap();
        assert_eq!(a, b);
        assert!(Shape::try_from(Vec::<usize>::new()).is_err());
    }

    #[test]
    fn test_scalar_like() {
        assert!(Shape::scalar().is_scalar_like());
        assert!(Shape::vector(1).unwrap().is_scalar_like());
        // (1, 1) holds one element but is not broadcastable
        assert!(!Shape::new(vec![1, 1]).unwrap().is_scalar_like());
    }

    #[test]
    fn test_matches() {
        let s = Shape::new(vec![3, 3]).unwrap();
        assert!(s.matches(&[3, 3]));
        assert!(!s.matches(&[3]));
        assert!(!s.matches(&[3, 3, 1]));
        assert!(!s.matches(&[3, 2]));
    }

    #[test]
    fn test_offset_first_axis_fastest() {
        let s = Shape::new(vec![2, 2]).unwrap();
        assert_eq!(s.offset_of(&[0, 0]).unwrap(), 0);
        assert_eq!(s.offset_of(&[1, 0]).unwrap(), 1);
        assert_eq!(s.offset_of(&[0, 1]).unwrap(), 2);
        assert_eq!(s.offset_of(&[1, 1]).unwrap(), 3);

        let s3 = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(s3.offset_of(&[1, 2, 3]).unwrap(), 1 + 2 * 2 + 3 * 6);
    }

    #[test]
    fn test_offset_out_of_range() {
        let s = Shape::new(vec![2, 2]).unwrap();
        assert!(matches!(
            s.offset_of(&[2, 0]),
            Err(KnumError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            s.offset_of(&[0]),
            Err(KnumError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(vec![4]).unwrap().to_string(), "(4,)");
        assert_eq!(Shape::new(vec![2, 3]).unwrap().to_string(), "(2, 3)");
        assert_eq!(format!("{:?}", Shape::new(vec![2, 3]).unwrap()), "Shape([2, 3])");
    }
}
