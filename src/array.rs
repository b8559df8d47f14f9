//! Core Array type for n-dimensional numeric arrays.

use crate::buffer::Buffer;
use crate::scalar::{Elem, Scalar};
use crate::{DType, Shape};
use std::fmt;

/// A multidimensional numeric array.
///
/// Arrays are contiguous and row-major. Cloning an `Array` is cheap and
/// yields an alias: both handles share one buffer, so in-place updates made
/// through either are visible through the other.
///
/// # Examples
///
/// ```
/// # use fuse_rs::{Array, DType, Shape};
/// let a = Array::zeros(Shape::new(vec![2, 3]), DType::Float32);
/// assert_eq!(a.shape().as_slice(), &[2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct Array {
    /// Underlying data buffer
    buffer: Buffer,
    /// Shape of the array
    shape: Shape,
}

macro_rules! from_vec_impl {
    ($($(#[$doc:meta])* $name:ident($ty:ty) => $dtype:ident, $variant:ident as $repr:ty;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(data: Vec<$ty>, shape: Shape) -> Self {
                let elems = data.into_iter().map(|v| Elem::$variant(v as $repr)).collect();
                Self::from_elems(elems, shape, DType::$dtype)
            }
        )*
    };
}

impl Array {
    /// Create a new array filled with zeros.
    ///
    /// # Examples
    ///
    /// ```
    /// # use fuse_rs::{Array, DType, Shape};
    /// let a = Array::zeros(Shape::new(vec![2, 3]), DType::Float32);
    /// assert_eq!(a.dtype(), DType::Float32);
    /// ```
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let buffer = Buffer::zeros(shape.size(), dtype);
        Self { buffer, shape }
    }

    /// Create a new array filled with ones.
    pub fn ones(shape: Shape, dtype: DType) -> Self {
        Self::full(Scalar::new(dtype, Elem::Int(1)), shape)
    }

    /// Create a new array filled with a scalar, taking the scalar's dtype.
    pub fn full(value: impl Into<Scalar>, shape: Shape) -> Self {
        let value = value.into();
        let buffer = Buffer::filled(value.elem(), shape.size(), value.dtype());
        Self { buffer, shape }
    }

    /// Create a 0-d array holding a scalar.
    pub fn from_scalar(value: Scalar) -> Self {
        Self::full(value, Shape::scalar())
    }

    /// Create an array from raw elements, casting them into `dtype`.
    ///
    /// # Panics
    ///
    /// Panics if the shape size doesn't match the data length.
    pub fn from_elems(data: Vec<Elem>, shape: Shape, dtype: DType) -> Self {
        assert_eq!(data.len(), shape.size(), "Data length must match shape size");
        let buffer = Buffer::from_elems(data, dtype);
        Self { buffer, shape }
    }

    /// Create an array from a buffer and shape (internal use).
    pub(crate) fn from_buffer(buffer: Buffer, shape: Shape) -> Self {
        Self { buffer, shape }
    }

    from_vec_impl! {
        /// Create an array from a Vec<f64>.
        ///
        /// # Examples
        ///
        /// ```
        /// # use fuse_rs::{Array, Shape};
        /// let a = Array::from_vec_f64(vec![1.0, 2.0, 3.0, 4.0], Shape::new(vec![2, 2]));
        /// assert_eq!(a.to_vec_f64(), vec![1.0, 2.0, 3.0, 4.0]);
        /// ```
        from_vec_f64(f64) => Float64, Float as f64;
        /// Create an array from a Vec<f32>.
        from_vec_f32(f32) => Float32, Float as f64;
        /// Create an array from a Vec<i64>.
        from_vec_i64(i64) => Int64, Int as i64;
        /// Create an array from a Vec<i32>.
        from_vec_i32(i32) => Int32, Int as i64;
        /// Create an array from a Vec<i16>.
        from_vec_i16(i16) => Int16, Int as i64;
        /// Create an array from a Vec<i8>.
        from_vec_i8(i8) => Int8, Int as i64;
        /// Create an array from a Vec<u64>.
        from_vec_u64(u64) => Uint64, UInt as u64;
        /// Create an array from a Vec<u32>.
        from_vec_u32(u32) => Uint32, UInt as u64;
        /// Create an array from a Vec<u16>.
        from_vec_u16(u16) => Uint16, UInt as u64;
        /// Create an array from a Vec<u8>.
        from_vec_u8(u8) => Uint8, UInt as u64;
    }

    /// Create an array from a Vec<bool>.
    pub fn from_vec_bool(data: Vec<bool>, shape: Shape) -> Self {
        let elems = data.into_iter().map(Elem::Bool).collect();
        Self::from_elems(elems, shape, DType::Bool)
    }

    /// Get the shape of the array.
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Get the data type of the array.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    /// Number of dimensions.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.shape.size()
    }

    /// Underlying buffer.
    pub(crate) fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Returns true if both arrays share storage.
    pub fn shares_buffer(&self, other: &Array) -> bool {
        self.buffer.ptr_eq(&other.buffer)
    }

    /// Copies the elements out.
    pub fn elems(&self) -> Vec<Elem> {
        self.buffer.snapshot()
    }

    /// Elements as `f64`.
    pub fn to_vec_f64(&self) -> Vec<f64> {
        self.buffer.read().iter().map(|e| e.as_f64()).collect()
    }

    /// Elements as `i64`.
    pub fn to_vec_i64(&self) -> Vec<i64> {
        self.buffer.read().iter().map(|e| e.as_i64()).collect()
    }

    /// Elements as `bool`.
    pub fn to_vec_bool(&self) -> Vec<bool> {
        self.buffer.read().iter().map(|e| e.as_bool()).collect()
    }

    /// Element at a multi-index, or None when out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<Scalar> {
        if index.len() != self.ndim()
            || index.iter().zip(self.shape.as_slice()).any(|(i, d)| i >= d)
        {
            return None;
        }
        let flat = self.shape.ravel(index);
        let value = *self.buffer.read().get(flat)?;
        Some(Scalar::new(self.dtype(), value))
    }

    /// The single element of a size-one array.
    pub fn item(&self) -> Option<Scalar> {
        if self.size() != 1 {
            return None;
        }
        let value = *self.buffer.read().first()?;
        Some(Scalar::new(self.dtype(), value))
    }

    /// Deep copy with fresh storage.
    pub fn copy(&self) -> Array {
        let buffer = Buffer::from_elems_unchecked(self.elems(), self.dtype());
        Self::from_buffer(buffer, self.shape.clone())
    }

    /// Copy converted to `dtype`.
    pub fn astype(&self, dtype: DType) -> Array {
        Self::from_elems(self.elems(), self.shape.clone(), dtype)
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array([")?;
        for (i, e) in self.buffer.read().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, "], shape={}, dtype={})", self.shape, self.dtype())
    }
}
