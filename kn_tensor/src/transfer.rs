//! Row-major 2-D and 3-D views over flat slices, first axis fastest.
//!
//! `get`/`set` index the slice directly and panic out of bounds, for loops
//! whose ranges are derived from the view's own extents. `try_get`/`try_set`
//! check the coordinate first. Views hold no cursor, so random access from
//! several views over one buffer never interferes.

use crate::error::{KnumError, Result};
use crate::shape::Shape;

fn out_of_range(coords: &[usize], extents: &[usize]) -> KnumError {
    KnumError::IndexOutOfRange {
        coords: coords.to_vec(),
        extents: extents.to_vec(),
    }
}

fn check_len(len: usize, extents: &[usize]) -> Result<()> {
    let want = extents
        .iter()
        .try_fold(1usize, |acc, &e| acc.checked_mul(e))
        .ok_or_else(|| KnumError::InvalidShape(format!("view of {extents:?} overflows usize")))?;
    if len != want {
        return Err(KnumError::ShapeMismatch(format!(
            "slice of {len} elements cannot back a view of {want}"
        )));
    }
    Ok(())
}

/// Read-only 2-D view: `width` = extent 0, `height` = extent 1.
#[derive(Debug, Clone, Copy)]
pub struct Grid2<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
}

impl<'a, T: Copy> Grid2<'a, T> {
    pub fn new(data: &'a [T], width: usize, height: usize) -> Result<Self> {
        check_len(data.len(), &[width, height])?;
        Ok(Grid2 { data, width, height })
    }

    /// View over a rank-2 shape.
    pub fn from_shape(data: &'a [T], shape: &Shape) -> Result<Self> {
        match shape.extents() {
            [w, h] => Self::new(data, *w, *h),
            other => Err(KnumError::ShapeMismatch(format!(
                "2-D view needs a rank-2 shape, got {other:?}"
            ))),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        x + y * self.width
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.index(x, y)]
    }

    pub fn try_get(&self, x: usize, y: usize) -> Result<T> {
        if x >= self.width || y >= self.height {
            return Err(out_of_range(&[x, y], &[self.width, self.height]));
        }
        Ok(self.get(x, y))
    }
}

/// Writable 2-D view.
#[derive(Debug)]
pub struct Grid2Mut<'a, T> {
    data: &'a mut [T],
    width: usize,
    height: usize,
}

impl<'a, T: Copy> Grid2Mut<'a, T> {
    pub fn new(data: &'a mut [T], width: usize, height: usize) -> Result<Self> {
        check_len(data.len(), &[width, height])?;
        Ok(Grid2Mut { data, width, height })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        x + y * self.width
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    pub fn try_set(&mut self, x: usize, y: usize, value: T) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(out_of_range(&[x, y], &[self.width, self.height]));
        }
        self.set(x, y, value);
        Ok(())
    }
}

/// Read-only 3-D view: index = x + (y + z * height) * width.
#[derive(Debug, Clone, Copy)]
pub struct Grid3<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    depth: usize,
}

impl<'a, T: Copy> Grid3<'a, T> {
    pub fn new(data: &'a [T], width: usize, height: usize, depth: usize) -> Result<Self> {
        check_len(data.len(), &[width, height, depth])?;
        Ok(Grid3 {
            data,
            width,
            height,
            depth,
        })
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + (y + z * self.height) * self.width
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.index(x, y, z)]
    }

    pub fn try_get(&self, x: usize, y: usize, z: usize) -> Result<T> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return Err(out_of_range(
                &[x, y, z],
                &[self.width, self.height, self.depth],
            ));
        }
        Ok(self.get(x, y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid2_matches_shape_offsets() {
        let data: Vec<i32> = (0..6).collect();
        let shape = Shape::new(vec![3, 2]).unwrap();
        let g = Grid2::from_shape(&data, &shape).unwrap();
        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(g.index(x, y), shape.offset_of(&[x, y]).unwrap());
            }
        }
        assert_eq!(g.get(2, 1), 5);
    }

    #[test]
    fn test_grid2_bounds() {
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let g = Grid2::new(&data, 2, 2).unwrap();
        assert_eq!(g.try_get(1, 1).unwrap(), 4.0);
        assert!(matches!(
            g.try_get(2, 0),
            Err(KnumError::IndexOutOfRange { .. })
        ));
        assert!(Grid2::new(&data, 3, 2).is_err());
    }

    #[test]
    fn test_grid2_mut_set() {
        let mut data = vec![0i32; 6];
        let mut g = Grid2Mut::new(&mut data, 3, 2).unwrap();
        g.set(1, 1, 9);
        assert!(g.try_set(3, 0, 1).is_err());
        assert_eq!(data, vec![0, 0, 0, 0, 9, 0]);
    }

    #[test]
    fn test_oversized_view_rejected() {
        let data = [0i32; 4];
        let huge = 1usize << (usize::BITS / 2 + 1);
        assert!(matches!(
            Grid2::new(&data, huge, huge),
            Err(KnumError::InvalidShape(_))
        ));
        assert!(matches!(
            Grid3::new(&data, 2, huge, huge),
            Err(KnumError::InvalidShape(_))
        ));
        let mut out = [0i32; 4];
        assert!(Grid2Mut::new(&mut out, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_grid3_index() {
        let data: Vec<i32> = (0..24).collect();
        let g = Grid3::new(&data, 2, 3, 4).unwrap();
        let shape = Shape::new(vec![2, 3, 4]).unwrap();
        assert_eq!(g.index(1, 2, 3), shape.offset_of(&[1, 2, 3]).unwrap());
        assert_eq!(g.get(1, 0, 1), 7);
        assert!(g.try_get(0, 0, 4).is_err());
    }

    #[test]
    fn test_interleaved_views_do_not_interfere() {
        let data = [1, 2, 3, 4];
        let a = Grid2::new(&data, 2, 2).unwrap();
        let b = Grid2::new(&data, 2, 2).unwrap();
        assert_eq!(a.get(1, 1), 4);
        assert_eq!(b.get(0, 0), 1);
        assert_eq!(a.get(0, 1), 3);
    }
}
