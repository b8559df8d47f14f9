//! Data type definitions and promotion rules.

use std::fmt;

/// Numerical data type for array contents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    /// Boolean (stored as 1-byte value)
    Bool,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    Uint8,
    /// 16-bit unsigned integer
    Uint16,
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit unsigned integer
    Uint64,
    /// 16-bit floating point
    Float16,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
}

/// Kind character of a dtype, ordered the way `same_kind` casting orders
/// them: bool < unsigned < signed < float.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    /// `b`
    Bool,
    /// `u`
    Unsigned,
    /// `i`
    Signed,
    /// `f`
    Float,
}

/// Coarse category used when scalars meet arrays: bool < integer < float.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Booleans.
    Bool,
    /// Signed and unsigned integers.
    Integer,
    /// Floating point.
    Float,
}

impl DType {
    /// Every supported dtype.
    pub const ALL: [DType; 12] = [
        DType::Bool,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::Uint8,
        DType::Uint16,
        DType::Uint32,
        DType::Uint64,
        DType::Float16,
        DType::Float32,
        DType::Float64,
    ];

    /// Returns the byte width of this dtype.
    #[inline]
    pub const fn byte_width(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::Uint8 => 1,
            DType::Float16 | DType::Int16 | DType::Uint16 => 2,
            DType::Float32 | DType::Int32 | DType::Uint32 => 4,
            DType::Float64 | DType::Int64 | DType::Uint64 => 8,
        }
    }

    /// Returns true if this is a floating-point dtype.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float16 | DType::Float64)
    }

    /// Returns true if this is an integer dtype.
    #[inline]
    pub const fn is_int(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    /// Returns true if this is a signed integer dtype.
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64
        )
    }

    /// Returns true if this is an unsigned integer dtype.
    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            DType::Uint8 | DType::Uint16 | DType::Uint32 | DType::Uint64
        )
    }

    /// Returns the kind character class.
    #[inline]
    pub const fn kind(self) -> Kind {
        if self.is_float() {
            Kind::Float
        } else if self.is_signed() {
            Kind::Signed
        } else if self.is_unsigned() {
            Kind::Unsigned
        } else {
            Kind::Bool
        }
    }

    /// Returns the coarse category used for scalar promotion.
    #[inline]
    pub const fn category(self) -> Category {
        match self.kind() {
            Kind::Bool => Category::Bool,
            Kind::Unsigned | Kind::Signed => Category::Integer,
            Kind::Float => Category::Float,
        }
    }

    /// Signed integer dtype of the given byte width, if one exists.
    fn signed_of_width(bytes: usize) -> Option<DType> {
        match bytes {
            1 => Some(DType::Int8),
            2 => Some(DType::Int16),
            4 => Some(DType::Int32),
            8 => Some(DType::Int64),
            _ => None,
        }
    }

    /// Smallest float dtype that represents every value of an integer dtype.
    fn float_for_int(self) -> DType {
        match self.byte_width() {
            1 => DType::Float16,
            2 => DType::Float32,
            _ => DType::Float64,
        }
    }

    /// Promotes two dtypes to the smallest dtype both cast to safely.
    ///
    /// # Examples
    ///
    /// ```
    /// # use fuse_rs::DType;
    /// assert_eq!(DType::promote(DType::Bool, DType::Int32), DType::Int32);
    /// assert_eq!(DType::promote(DType::Uint8, DType::Int8), DType::Int16);
    /// assert_eq!(DType::promote(DType::Uint64, DType::Int64), DType::Float64);
    /// assert_eq!(DType::promote(DType::Int16, DType::Float16), DType::Float32);
    /// ```
    pub fn promote(dtype1: DType, dtype2: DType) -> DType {
        if dtype1 == dtype2 {
            return dtype1;
        }
        use Kind::*;
        match (dtype1.kind(), dtype2.kind()) {
            (Bool, _) => dtype2,
            (_, Bool) => dtype1,
            (Float, Float) | (Signed, Signed) | (Unsigned, Unsigned) => {
                if dtype1.byte_width() >= dtype2.byte_width() {
                    dtype1
                } else {
                    dtype2
                }
            }
            (Float, _) => Self::promote(dtype1, dtype2.float_for_int()),
            (_, Float) => Self::promote(dtype1.float_for_int(), dtype2),
            (Unsigned, Signed) => Self::promote_mixed_sign(dtype1, dtype2),
            (Signed, Unsigned) => Self::promote_mixed_sign(dtype2, dtype1),
        }
    }

    fn promote_mixed_sign(unsigned: DType, signed: DType) -> DType {
        if signed.byte_width() > unsigned.byte_width() {
            return signed;
        }
        Self::signed_of_width(unsigned.byte_width() * 2).unwrap_or(DType::Float64)
    }

    /// Result dtype of combining operands, where each operand is a dtype and
    /// a flag telling whether it is a scalar.
    ///
    /// Scalars only take part when no array operand exists or when their
    /// category exceeds the highest array category.
    pub fn result_type(operands: &[(DType, bool)]) -> Option<DType> {
        let max_array = operands
            .iter()
            .filter(|(_, scalar)| !scalar)
            .map(|(d, _)| d.category())
            .max();
        let max_scalar = operands
            .iter()
            .filter(|(_, scalar)| *scalar)
            .map(|(d, _)| d.category())
            .max();
        let use_scalars = match (max_array, max_scalar) {
            (Some(a), Some(s)) => s > a,
            _ => true,
        };
        operands
            .iter()
            .filter(|(_, scalar)| use_scalars || !scalar)
            .map(|(d, _)| *d)
            .reduce(DType::promote)
    }

    /// Whether a value of `from` may be stored into `to` under `same_kind`
    /// casting.
    pub fn can_cast_same_kind(from: DType, to: DType) -> bool {
        from.kind() <= to.kind()
    }

    /// Loop dtype of float-valued functions applied to this dtype.
    pub fn float_lift(self) -> DType {
        if self.is_float() {
            self
        } else {
            self.float_for_int()
        }
    }

    /// Returns the canonical name of this dtype.
    pub const fn as_str(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float16 => "float16",
            DType::Float64 => "float64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Bool => "bool",
        }
    }

    /// C type used in generated kernel source.
    pub const fn c_type(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int8 => "signed char",
            DType::Int16 => "short",
            DType::Int32 => "int",
            DType::Int64 => "long long",
            DType::Uint8 => "unsigned char",
            DType::Uint16 => "unsigned short",
            DType::Uint32 => "unsigned int",
            DType::Uint64 => "unsigned long long",
            DType::Float16 => "float16",
            DType::Float32 => "float",
            DType::Float64 => "double",
        }
    }

    /// Parse a string into a DType.
    pub fn parse(s: &str) -> Option<DType> {
        match s.to_lowercase().as_str() {
            "float32" | "f32" => Some(DType::Float32),
            "float16" | "f16" => Some(DType::Float16),
            "float64" | "f64" => Some(DType::Float64),
            "int8" | "i8" => Some(DType::Int8),
            "int16" | "i16" => Some(DType::Int16),
            "int32" | "i32" => Some(DType::Int32),
            "int64" | "i64" => Some(DType::Int64),
            "uint8" | "u8" => Some(DType::Uint8),
            "uint16" | "u16" => Some(DType::Uint16),
            "uint32" | "u32" => Some(DType::Uint32),
            "uint64" | "u64" => Some(DType::Uint64),
            "bool" => Some(DType::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_width() {
        assert_eq!(DType::Float32.byte_width(), 4);
        assert_eq!(DType::Float16.byte_width(), 2);
        assert_eq!(DType::Float64.byte_width(), 8);
        assert_eq!(DType::Int8.byte_width(), 1);
        assert_eq!(DType::Uint64.byte_width(), 8);
        assert_eq!(DType::Bool.byte_width(), 1);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(DType::Bool.kind(), Kind::Bool);
        assert_eq!(DType::Uint16.kind(), Kind::Unsigned);
        assert_eq!(DType::Int16.kind(), Kind::Signed);
        assert_eq!(DType::Float16.kind(), Kind::Float);
        assert_eq!(DType::Uint8.category(), DType::Int64.category());
    }

    #[test]
    fn test_type_promotion() {
        assert_eq!(DType::promote(DType::Bool, DType::Int32), DType::Int32);
        assert_eq!(DType::promote(DType::Uint32, DType::Int32), DType::Int64);
        assert_eq!(DType::promote(DType::Uint8, DType::Int16), DType::Int16);
        assert_eq!(DType::promote(DType::Uint64, DType::Int8), DType::Float64);
        assert_eq!(DType::promote(DType::Int8, DType::Float16), DType::Float16);
        assert_eq!(DType::promote(DType::Int32, DType::Float32), DType::Float64);
        assert_eq!(DType::promote(DType::Uint16, DType::Float32), DType::Float32);
        assert_eq!(DType::promote(DType::Float16, DType::Float32), DType::Float32);
        assert_eq!(DType::promote(DType::Uint8, DType::Uint16), DType::Uint16);
    }

    #[test]
    fn test_promotion_is_symmetric() {
        for &a in DType::ALL.iter() {
            for &b in DType::ALL.iter() {
                assert_eq!(DType::promote(a, b), DType::promote(b, a), "{a} {b}");
            }
        }
    }

    #[test]
    fn test_result_type_scalars() {
        // Integer scalar does not widen an int8 array.
        assert_eq!(
            DType::result_type(&[(DType::Int8, false), (DType::Int64, true)]),
            Some(DType::Int8)
        );
        // Float scalar lifts an integer array.
        assert_eq!(
            DType::result_type(&[(DType::Int8, false), (DType::Float64, true)]),
            Some(DType::Float64)
        );
        // Only scalars: ordinary promotion.
        assert_eq!(
            DType::result_type(&[(DType::Int8, true), (DType::Int32, true)]),
            Some(DType::Int32)
        );
        assert_eq!(DType::result_type(&[]), None);
    }

    #[test]
    fn test_same_kind() {
        assert!(DType::can_cast_same_kind(DType::Float64, DType::Float32));
        assert!(DType::can_cast_same_kind(DType::Int64, DType::Int8));
        assert!(DType::can_cast_same_kind(DType::Uint8, DType::Int8));
        assert!(!DType::can_cast_same_kind(DType::Int8, DType::Uint8));
        assert!(!DType::can_cast_same_kind(DType::Float16, DType::Int64));
        assert!(DType::can_cast_same_kind(DType::Bool, DType::Uint8));
    }

    #[test]
    fn test_float_lift() {
        assert_eq!(DType::Bool.float_lift(), DType::Float16);
        assert_eq!(DType::Uint16.float_lift(), DType::Float32);
        assert_eq!(DType::Int64.float_lift(), DType::Float64);
        assert_eq!(DType::Float32.float_lift(), DType::Float32);
    }

    #[test]
    fn test_display_and_parse() {
        for &d in DType::ALL.iter() {
            assert_eq!(DType::parse(&d.to_string()), Some(d));
        }
        assert_eq!(DType::parse("unknown"), None);
    }
}
