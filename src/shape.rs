//! Shape utilities, broadcasting and slice regions.

use crate::error::{FuseError, FuseResult, ShapeError};
use std::fmt;

/// Shape of an n-dimensional array.
///
/// Represented as a vector of dimensions. An empty vector represents a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from dimensions.
    ///
    /// # Examples
    ///
    /// ```
    /// # use fuse_rs::Shape;
    /// let shape = Shape::new(vec![2, 3, 4]);
    /// assert_eq!(shape.ndim(), 3);
    /// assert_eq!(shape.size(), 24);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Create a scalar shape (empty dimensions).
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    /// Returns the number of dimensions.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns a slice of the dimensions.
    #[inline]
    pub fn as_slice(&self) -> &[usize] {
        &self.dims
    }

    /// Returns true if this is a scalar shape.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Get a specific dimension, or None if out of bounds.
    pub fn get(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Check if two shapes are broadcast-compatible and return the result shape.
    ///
    /// Following NumPy broadcasting rules: dimensions are compatible if they are equal
    /// or one of them is 1.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let mut result = Vec::with_capacity(ndim);

        for i in 0..ndim {
            let dim1 = if i < self.ndim() {
                self.dims[self.ndim() - 1 - i]
            } else {
                1
            };
            let dim2 = if i < other.ndim() {
                other.dims[other.ndim() - 1 - i]
            } else {
                1
            };

            if dim1 == dim2 || dim1 == 1 || dim2 == 1 {
                result.push(if dim1 == 1 { dim2 } else { dim1 });
            } else {
                return None;
            }
        }

        result.reverse();
        Some(Shape::new(result))
    }

    /// Broadcasts any number of shapes together.
    ///
    /// The error lists every operand shape, in order.
    pub fn broadcast_all(shapes: &[&Shape]) -> FuseResult<Shape> {
        let mut result = Shape::scalar();
        for shape in shapes {
            result = result
                .broadcast_with(shape)
                .ok_or_else(|| FuseError::not_broadcastable(shapes))?;
        }
        Ok(result)
    }

    /// Checks that `self` broadcasts into `target` without changing it.
    pub fn broadcasts_into(&self, target: &Shape) -> bool {
        self.broadcast_with(target).as_ref() == Some(target)
    }

    /// Shape after removing `axis`.
    pub fn remove_axis(&self, axis: usize) -> FuseResult<Shape> {
        if axis >= self.ndim() {
            return Err(ShapeError::AxisOutOfBounds {
                axis,
                ndim: self.ndim(),
            }
            .into());
        }
        let mut dims = self.dims.clone();
        dims.remove(axis);
        Ok(Shape::new(dims))
    }

    /// Flat C-order offset of a multi-index.
    pub fn ravel(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(&self.dims)
            .fold(0, |acc, (&i, &d)| acc * d + i)
    }

    /// Multi-index of a flat C-order offset, written into `out`.
    pub fn unravel_into(&self, mut flat: usize, out: &mut Vec<usize>) {
        out.clear();
        out.resize(self.ndim(), 0);
        for (slot, &d) in out.iter_mut().zip(&self.dims).rev() {
            if d > 0 {
                *slot = flat % d;
                flat /= d;
            }
        }
    }

    /// Maps an index of a broadcast result back onto this (smaller) shape.
    ///
    /// `index` addresses a shape this one broadcasts into; leading extra
    /// axes are dropped and axes of extent one are pinned to zero.
    pub fn unbroadcast_into(&self, index: &[usize], out: &mut Vec<usize>) {
        out.clear();
        let skip = index.len().saturating_sub(self.ndim());
        out.extend(
            index[skip..]
                .iter()
                .zip(&self.dims)
                .map(|(&i, &d)| if d == 1 { 0 } else { i }),
        );
    }

    /// Flat offset into this shape of an index of a broadcast result.
    pub fn unbroadcast_offset(&self, index: &[usize]) -> usize {
        let skip = index.len().saturating_sub(self.ndim());
        index[skip..]
            .iter()
            .zip(&self.dims)
            .fold(0, |acc, (&i, &d)| acc * d + if d == 1 { 0 } else { i })
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

/// Part of an array overwritten by a slice assignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Region {
    /// `x[...] = y` or `x[:] = y`.
    Full,
    /// `x[start:stop] = y` along the leading axis. Bounds clamp to the axis
    /// length the way slicing does.
    Rows {
        /// First row written.
        start: usize,
        /// One past the last row written.
        stop: usize,
    },
}

impl Region {
    /// Clamped row bounds of this region within `target`.
    pub fn rows(&self, target: &Shape) -> (usize, usize) {
        let len = target.get(0).unwrap_or(1);
        match *self {
            Region::Full => (0, len),
            Region::Rows { start, stop } => {
                let stop = stop.min(len);
                (start.min(stop), stop)
            }
        }
    }

    /// Shape of the written part of `target`.
    pub fn shape_in(&self, target: &Shape) -> FuseResult<Shape> {
        match self {
            Region::Full => Ok(target.clone()),
            Region::Rows { .. } => {
                if target.is_scalar() {
                    return Err(ShapeError::TooManyIndices.into());
                }
                let (start, stop) = self.rows(target);
                let mut dims = target.as_slice().to_vec();
                dims[0] = stop - start;
                Ok(Shape::new(dims))
            }
        }
    }

    /// Checks that `src` can be written into this region of `target` and
    /// returns the region shape.
    pub fn check_source(&self, src: &Shape, target: &Shape) -> FuseResult<Shape> {
        let dst = self.shape_in(target)?;
        if src.broadcasts_into(&dst) {
            Ok(dst)
        } else {
            Err(ShapeError::SetItem {
                src: src.clone(),
                dst,
            }
            .into())
        }
    }
}
