//! Scalar values and the element representation shared by every buffer.

use crate::DType;
use half::f16;
use std::fmt;

/// One stored element.
///
/// The variant follows the kind of the owning dtype: signed integers are
/// held sign-extended in `Int`, unsigned ones zero-extended in `UInt`, and
/// floats already rounded to their dtype's precision in `Float`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Elem {
    /// Boolean element.
    Bool(bool),
    /// Signed integer element.
    Int(i64),
    /// Unsigned integer element.
    UInt(u64),
    /// Floating point element.
    Float(f64),
}

impl Elem {
    /// Zero of the given dtype.
    pub fn zero(dtype: DType) -> Elem {
        Elem::Bool(false).cast(dtype)
    }

    /// Value as `f64`.
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Elem::Bool(b) => b as u8 as f64,
            Elem::Int(i) => i as f64,
            Elem::UInt(u) => u as f64,
            Elem::Float(f) => f,
        }
    }

    /// Value as `i64`, wrapping unsigned and truncating floats.
    #[inline]
    pub fn as_i64(self) -> i64 {
        match self {
            Elem::Bool(b) => b as i64,
            Elem::Int(i) => i,
            Elem::UInt(u) => u as i64,
            Elem::Float(f) => float_to_i64(f),
        }
    }

    /// Value as `u64`, wrapping signed and truncating floats.
    #[inline]
    pub fn as_u64(self) -> u64 {
        match self {
            Elem::Bool(b) => b as u64,
            Elem::Int(i) => i as u64,
            Elem::UInt(u) => u,
            Elem::Float(f) => {
                if f >= 0.0 {
                    f as u64
                } else {
                    float_to_i64(f) as u64
                }
            }
        }
    }

    /// Truthiness of the value.
    #[inline]
    pub fn as_bool(self) -> bool {
        match self {
            Elem::Bool(b) => b,
            Elem::Int(i) => i != 0,
            Elem::UInt(u) => u != 0,
            Elem::Float(f) => f != 0.0,
        }
    }

    /// Converts to `dtype` with C-style `unsafe` casting: integers wrap to
    /// the target width and floats round to the target precision.
    pub fn cast(self, dtype: DType) -> Elem {
        match dtype {
            DType::Bool => Elem::Bool(self.as_bool()),
            DType::Int8 => Elem::Int(self.as_i64() as i8 as i64),
            DType::Int16 => Elem::Int(self.as_i64() as i16 as i64),
            DType::Int32 => Elem::Int(self.as_i64() as i32 as i64),
            DType::Int64 => Elem::Int(self.as_i64()),
            DType::Uint8 => Elem::UInt(self.as_u64() as u8 as u64),
            DType::Uint16 => Elem::UInt(self.as_u64() as u16 as u64),
            DType::Uint32 => Elem::UInt(self.as_u64() as u32 as u64),
            DType::Uint64 => Elem::UInt(self.as_u64()),
            DType::Float16 => Elem::Float(f16::from_f64(self.as_f64()).to_f64()),
            DType::Float32 => Elem::Float(self.as_f64() as f32 as f64),
            DType::Float64 => Elem::Float(self.as_f64()),
        }
    }
}

// NaN and out-of-range values have no defined integer image; saturate.
fn float_to_i64(f: f64) -> i64 {
    if f.is_nan() {
        0
    } else {
        f as i64
    }
}

/// A typed scalar value.
///
/// Scalars take part in dtype promotion by kind only: an integer scalar
/// never widens an integer array, a float scalar lifts it to float.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Scalar {
    dtype: DType,
    value: Elem,
}

impl Scalar {
    /// Create a scalar of `dtype`, casting `value` into it.
    pub fn new(dtype: DType, value: Elem) -> Self {
        Self {
            dtype,
            value: value.cast(dtype),
        }
    }

    /// Returns the dtype.
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the stored element.
    #[inline]
    pub fn elem(&self) -> Elem {
        self.value
    }

    /// Value as `f64`.
    pub fn to_f64(&self) -> f64 {
        self.value.as_f64()
    }

    /// Value as `i64`.
    pub fn to_i64(&self) -> i64 {
        self.value.as_i64()
    }

    /// Truthiness of the value.
    pub fn to_bool(&self) -> bool {
        self.value.as_bool()
    }

    /// Converts to another dtype.
    pub fn astype(&self, dtype: DType) -> Scalar {
        Scalar::new(dtype, self.value)
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $dtype:ident, $variant:ident as $repr:ty);* $(;)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar { dtype: DType::$dtype, value: Elem::$variant(v as $repr) }
                }
            }
        )*
    };
}

scalar_from! {
    i8 => Int8, Int as i64;
    i16 => Int16, Int as i64;
    i32 => Int32, Int as i64;
    i64 => Int64, Int as i64;
    u8 => Uint8, UInt as u64;
    u16 => Uint16, UInt as u64;
    u32 => Uint32, UInt as u64;
    u64 => Uint64, UInt as u64;
    f64 => Float64, Float as f64;
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar {
            dtype: DType::Bool,
            value: Elem::Bool(v),
        }
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar {
            dtype: DType::Float32,
            value: Elem::Float(v as f64),
        }
    }
}

impl From<f16> for Scalar {
    fn from(v: f16) -> Self {
        Scalar {
            dtype: DType::Float16,
            value: Elem::Float(v.to_f64()),
        }
    }
}

impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elem::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Elem::Int(i) => write!(f, "{i}"),
            Elem::UInt(u) => write!(f, "{u}"),
            Elem::Float(x) => write!(f, "{x:?}"),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.dtype, self.value)
    }
}
