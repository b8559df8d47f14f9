//! Ufunc catalogue and loop resolution.
//!
//! Every elementwise primitive the fused and eager paths understand is a
//! [`Ufunc`]. Resolving a ufunc against its operand dtypes yields a
//! [`Loop`]: the dtype each input is cast to before the per-element math
//! runs, and the dtype of each output.

use crate::error::{FuseError, FuseResult};
use crate::DType;
use std::fmt;

/// Elementwise primitive operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Ufunc {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    TrueDivide,
    FloorDivide,
    Remainder,
    Fmod,
    Power,
    Maximum,
    Minimum,
    Fmax,
    Fmin,
    Absolute,
    Negative,
    Sign,
    Square,
    Reciprocal,

    // Floating point functions
    Sqrt,
    Cbrt,
    Exp,
    Exp2,
    Expm1,
    Log,
    Log2,
    Log10,
    Log1p,
    Sin,
    Cos,
    Tan,
    Arcsin,
    Arccos,
    Arctan,
    Sinh,
    Cosh,
    Tanh,
    Arcsinh,
    Arccosh,
    Arctanh,
    Deg2rad,
    Rad2deg,
    Floor,
    Ceil,
    Trunc,
    Rint,
    Arctan2,
    Hypot,
    Copysign,
    Nextafter,
    Logaddexp,
    Logaddexp2,

    // Comparisons
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
    NotEqual,

    // Logic
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalNot,
    Isnan,
    Isinf,
    Isfinite,
    Signbit,

    // Bit manipulation
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Invert,
    LeftShift,
    RightShift,

    // Multiple outputs and mixed signatures
    Modf,
    Divmod,
    Frexp,
    Ldexp,
    Where,
    Clip,
}

/// How a ufunc maps operand dtypes to its loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoopClass {
    /// Loops for every dtype, output keeps the common dtype.
    Arith,
    /// No bool loop: bool operands run in int8.
    ArithNoBool,
    /// Like `ArithNoBool`, but boolean operands are rejected.
    RejectBool,
    /// Integers and bools divide in float64.
    TrueDivide,
    /// Float loops only; integers lift to the smallest exact float.
    Float,
    /// Compares in the common dtype, returns bool.
    Compare,
    /// Operates on truthiness, returns bool.
    Logical,
    /// Float classification, returns bool.
    Predicate,
    /// Bool and integer loops only.
    Bitwise,
    /// Integer loops only; bools run in int8.
    Shift,
    /// Loop shape particular to one ufunc.
    Special,
}

/// A resolved inner loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Loop {
    /// Dtype each input is cast to.
    pub inputs: Vec<DType>,
    /// Dtype of each output.
    pub outputs: Vec<DType>,
}

impl Loop {
    fn uniform(nin: usize, input: DType, outputs: Vec<DType>) -> Self {
        Self {
            inputs: vec![input; nin],
            outputs,
        }
    }

    /// Dtype the loop computes in.
    pub fn compute(&self) -> DType {
        self.inputs.first().copied().unwrap_or(DType::Float64)
    }
}

impl Ufunc {
    /// Every ufunc in the catalogue.
    pub const ALL: &'static [Ufunc] = &[
        Ufunc::Add,
        Ufunc::Subtract,
        Ufunc::Multiply,
        Ufunc::TrueDivide,
        Ufunc::FloorDivide,
        Ufunc::Remainder,
        Ufunc::Fmod,
        Ufunc::Power,
        Ufunc::Maximum,
        Ufunc::Minimum,
        Ufunc::Fmax,
        Ufunc::Fmin,
        Ufunc::Absolute,
        Ufunc::Negative,
        Ufunc::Sign,
        Ufunc::Square,
        Ufunc::Reciprocal,
        Ufunc::Sqrt,
        Ufunc::Cbrt,
        Ufunc::Exp,
        Ufunc::Exp2,
        Ufunc::Expm1,
        Ufunc::Log,
        Ufunc::Log2,
        Ufunc::Log10,
        Ufunc::Log1p,
        Ufunc::Sin,
        Ufunc::Cos,
        Ufunc::Tan,
        Ufunc::Arcsin,
        Ufunc::Arccos,
        Ufunc::Arctan,
        Ufunc::Sinh,
        Ufunc::Cosh,
        Ufunc::Tanh,
        Ufunc::Arcsinh,
        Ufunc::Arccosh,
        Ufunc::Arctanh,
        Ufunc::Deg2rad,
        Ufunc::Rad2deg,
        Ufunc::Floor,
        Ufunc::Ceil,
        Ufunc::Trunc,
        Ufunc::Rint,
        Ufunc::Arctan2,
        Ufunc::Hypot,
        Ufunc::Copysign,
        Ufunc::Nextafter,
        Ufunc::Logaddexp,
        Ufunc::Logaddexp2,
        Ufunc::Greater,
        Ufunc::GreaterEqual,
        Ufunc::Less,
        Ufunc::LessEqual,
        Ufunc::Equal,
        Ufunc::NotEqual,
        Ufunc::LogicalAnd,
        Ufunc::LogicalOr,
        Ufunc::LogicalXor,
        Ufunc::LogicalNot,
        Ufunc::Isnan,
        Ufunc::Isinf,
        Ufunc::Isfinite,
        Ufunc::Signbit,
        Ufunc::BitwiseAnd,
        Ufunc::BitwiseOr,
        Ufunc::BitwiseXor,
        Ufunc::Invert,
        Ufunc::LeftShift,
        Ufunc::RightShift,
        Ufunc::Modf,
        Ufunc::Divmod,
        Ufunc::Frexp,
        Ufunc::Ldexp,
        Ufunc::Where,
        Ufunc::Clip,
    ];

    /// NumPy name of the ufunc.
    pub const fn name(self) -> &'static str {
        use Ufunc::*;
        match self {
            Add => "add",
            Subtract => "subtract",
            Multiply => "multiply",
            TrueDivide => "true_divide",
            FloorDivide => "floor_divide",
            Remainder => "remainder",
            Fmod => "fmod",
            Power => "power",
            Maximum => "maximum",
            Minimum => "minimum",
            Fmax => "fmax",
            Fmin => "fmin",
            Absolute => "absolute",
            Negative => "negative",
            Sign => "sign",
            Square => "square",
            Reciprocal => "reciprocal",
            Sqrt => "sqrt",
            Cbrt => "cbrt",
            Exp => "exp",
            Exp2 => "exp2",
            Expm1 => "expm1",
            Log => "log",
            Log2 => "log2",
            Log10 => "log10",
            Log1p => "log1p",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Arcsin => "arcsin",
            Arccos => "arccos",
            Arctan => "arctan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Arcsinh => "arcsinh",
            Arccosh => "arccosh",
            Arctanh => "arctanh",
            Deg2rad => "deg2rad",
            Rad2deg => "rad2deg",
            Floor => "floor",
            Ceil => "ceil",
            Trunc => "trunc",
            Rint => "rint",
            Arctan2 => "arctan2",
            Hypot => "hypot",
            Copysign => "copysign",
            Nextafter => "nextafter",
            Logaddexp => "logaddexp",
            Logaddexp2 => "logaddexp2",
            Greater => "greater",
            GreaterEqual => "greater_equal",
            Less => "less",
            LessEqual => "less_equal",
            Equal => "equal",
            NotEqual => "not_equal",
            LogicalAnd => "logical_and",
            LogicalOr => "logical_or",
            LogicalXor => "logical_xor",
            LogicalNot => "logical_not",
            Isnan => "isnan",
            Isinf => "isinf",
            Isfinite => "isfinite",
            Signbit => "signbit",
            BitwiseAnd => "bitwise_and",
            BitwiseOr => "bitwise_or",
            BitwiseXor => "bitwise_xor",
            Invert => "invert",
            LeftShift => "left_shift",
            RightShift => "right_shift",
            Modf => "modf",
            Divmod => "divmod",
            Frexp => "frexp",
            Ldexp => "ldexp",
            Where => "where",
            Clip => "clip",
        }
    }

    /// Looks a ufunc up by its NumPy name.
    pub fn from_name(name: &str) -> Option<Ufunc> {
        match name {
            "divide" => Some(Ufunc::TrueDivide),
            "mod" => Some(Ufunc::Remainder),
            "abs" => Some(Ufunc::Absolute),
            _ => Self::ALL.iter().copied().find(|u| u.name() == name),
        }
    }

    /// Number of inputs.
    pub const fn nin(self) -> usize {
        use Ufunc::*;
        match self {
            Absolute | Negative | Sign | Square | Reciprocal | Sqrt | Cbrt | Exp | Exp2
            | Expm1 | Log | Log2 | Log10 | Log1p | Sin | Cos | Tan | Arcsin | Arccos
            | Arctan | Sinh | Cosh | Tanh | Arcsinh | Arccosh | Arctanh | Deg2rad
            | Rad2deg | Floor | Ceil | Trunc | Rint | LogicalNot | Isnan | Isinf
            | Isfinite | Signbit | Invert | Modf | Frexp => 1,
            Where | Clip => 3,
            _ => 2,
        }
    }

    /// Number of outputs.
    pub const fn nout(self) -> usize {
        match self {
            Ufunc::Modf | Ufunc::Divmod | Ufunc::Frexp => 2,
            _ => 1,
        }
    }

    /// Loop class of the ufunc.
    pub const fn class(self) -> LoopClass {
        use Ufunc::*;
        match self {
            Add | Multiply | Maximum | Minimum | Fmax | Fmin | Absolute => LoopClass::Arith,
            FloorDivide | Remainder | Fmod | Power | Sign | Square | Reciprocal => {
                LoopClass::ArithNoBool
            }
            Subtract | Negative => LoopClass::RejectBool,
            TrueDivide => LoopClass::TrueDivide,
            Sqrt | Cbrt | Exp | Exp2 | Expm1 | Log | Log2 | Log10 | Log1p | Sin | Cos
            | Tan | Arcsin | Arccos | Arctan | Sinh | Cosh | Tanh | Arcsinh | Arccosh
            | Arctanh | Deg2rad | Rad2deg | Floor | Ceil | Trunc | Rint | Arctan2 | Hypot
            | Copysign | Nextafter | Logaddexp | Logaddexp2 => LoopClass::Float,
            Greater | GreaterEqual | Less | LessEqual | Equal | NotEqual => LoopClass::Compare,
            LogicalAnd | LogicalOr | LogicalXor | LogicalNot => LoopClass::Logical,
            Isnan | Isinf | Isfinite | Signbit => LoopClass::Predicate,
            BitwiseAnd | BitwiseOr | BitwiseXor | Invert => LoopClass::Bitwise,
            LeftShift | RightShift => LoopClass::Shift,
            Modf | Divmod | Frexp | Ldexp | Where | Clip => LoopClass::Special,
        }
    }

    /// Resolves the inner loop for operands given as `(dtype, is_scalar)`.
    ///
    /// Scalars take part in promotion by kind category only, see
    /// [`DType::result_type`].
    pub fn resolve(self, operands: &[(DType, bool)]) -> FuseResult<Loop> {
        if operands.len() != self.nin() {
            return Err(FuseError::Type(format!(
                "{}() takes {} positional arguments but {} were given",
                self.name(),
                self.nin(),
                operands.len()
            )));
        }
        let nin = self.nin();
        let common = DType::result_type(operands).unwrap_or(DType::Float64);
        let same = |d: DType| Loop::uniform(nin, d, vec![d; self.nout()]);
        let no_bool = |d: DType| if d == DType::Bool { DType::Int8 } else { d };

        let resolved = match self.class() {
            LoopClass::Arith => same(common),
            LoopClass::ArithNoBool => same(no_bool(common)),
            LoopClass::RejectBool => {
                if common == DType::Bool {
                    return Err(FuseError::Type(bool_rejection(self)));
                }
                same(common)
            }
            LoopClass::TrueDivide => {
                if common.is_float() {
                    same(common)
                } else {
                    same(DType::Float64)
                }
            }
            LoopClass::Float => same(common.float_lift()),
            LoopClass::Compare => Loop::uniform(nin, common, vec![DType::Bool]),
            LoopClass::Logical => Loop::uniform(nin, DType::Bool, vec![DType::Bool]),
            LoopClass::Predicate => Loop::uniform(nin, common.float_lift(), vec![DType::Bool]),
            LoopClass::Bitwise => {
                if common.is_float() {
                    return Err(FuseError::no_loop(self.name()));
                }
                same(common)
            }
            LoopClass::Shift => {
                if common.is_float() {
                    return Err(FuseError::no_loop(self.name()));
                }
                same(no_bool(common))
            }
            LoopClass::Special => self.resolve_special(operands, common)?,
        };
        Ok(resolved)
    }

    fn resolve_special(self, operands: &[(DType, bool)], common: DType) -> FuseResult<Loop> {
        let resolved = match self {
            Ufunc::Modf => {
                let d = common.float_lift();
                Loop::uniform(1, d, vec![d, d])
            }
            Ufunc::Frexp => {
                let d = common.float_lift();
                Loop::uniform(1, d, vec![d, DType::Int32])
            }
            Ufunc::Divmod => {
                let d = if common == DType::Bool { DType::Int8 } else { common };
                Loop::uniform(2, d, vec![d, d])
            }
            Ufunc::Ldexp => {
                let (mantissa, _) = operands[0];
                let (exponent, _) = operands[1];
                if mantissa.is_float() && exponent == DType::Bool {
                    return Err(FuseError::no_loop(self.name()));
                }
                if exponent.is_float() || exponent == DType::Uint64 {
                    return Err(FuseError::no_loop(self.name()));
                }
                let d = mantissa.float_lift();
                Loop {
                    inputs: vec![d, DType::Int64],
                    outputs: vec![d],
                }
            }
            Ufunc::Where => {
                let value = DType::result_type(&operands[1..]).unwrap_or(DType::Float64);
                Loop {
                    inputs: vec![DType::Bool, value, value],
                    outputs: vec![value],
                }
            }
            Ufunc::Clip => Loop::uniform(3, common, vec![common]),
            other => {
                return Err(FuseError::Type(format!(
                    "ufunc '{}' has no special loop",
                    other.name()
                )))
            }
        };
        Ok(resolved)
    }

    /// C expression template used by generated kernel source.
    ///
    /// `$0`, `$1` and `$2` stand for the input operands.
    pub const fn c_template(self) -> &'static str {
        use Ufunc::*;
        match self {
            Add => "$0 + $1",
            Subtract => "$0 - $1",
            Multiply => "$0 * $1",
            TrueDivide => "$0 / $1",
            FloorDivide => "_floor_divide($0, $1)",
            Remainder => "_python_mod($0, $1)",
            Fmod => "fmod($0, $1)",
            Power => "pow($0, $1)",
            Maximum => "_maximum($0, $1)",
            Minimum => "_minimum($0, $1)",
            Fmax => "fmax($0, $1)",
            Fmin => "fmin($0, $1)",
            Absolute => "abs($0)",
            Negative => "-$0",
            Sign => "_sign($0)",
            Square => "$0 * $0",
            Reciprocal => "1 / $0",
            Sqrt => "sqrt($0)",
            Cbrt => "cbrt($0)",
            Exp => "exp($0)",
            Exp2 => "exp2($0)",
            Expm1 => "expm1($0)",
            Log => "log($0)",
            Log2 => "log2($0)",
            Log10 => "log10($0)",
            Log1p => "log1p($0)",
            Sin => "sin($0)",
            Cos => "cos($0)",
            Tan => "tan($0)",
            Arcsin => "asin($0)",
            Arccos => "acos($0)",
            Arctan => "atan($0)",
            Sinh => "sinh($0)",
            Cosh => "cosh($0)",
            Tanh => "tanh($0)",
            Arcsinh => "asinh($0)",
            Arccosh => "acosh($0)",
            Arctanh => "atanh($0)",
            Deg2rad => "$0 * (M_PI / 180)",
            Rad2deg => "$0 * (180 / M_PI)",
            Floor => "floor($0)",
            Ceil => "ceil($0)",
            Trunc => "trunc($0)",
            Rint => "rint($0)",
            Arctan2 => "atan2($0, $1)",
            Hypot => "hypot($0, $1)",
            Copysign => "copysign($0, $1)",
            Nextafter => "nextafter($0, $1)",
            Logaddexp => "_logaddexp($0, $1)",
            Logaddexp2 => "_logaddexp2($0, $1)",
            Greater => "$0 > $1",
            GreaterEqual => "$0 >= $1",
            Less => "$0 < $1",
            LessEqual => "$0 <= $1",
            Equal => "$0 == $1",
            NotEqual => "$0 != $1",
            LogicalAnd => "$0 && $1",
            LogicalOr => "$0 || $1",
            LogicalXor => "$0 != $1",
            LogicalNot => "!$0",
            Isnan => "isnan($0)",
            Isinf => "isinf($0)",
            Isfinite => "isfinite($0)",
            Signbit => "signbit($0)",
            BitwiseAnd => "$0 & $1",
            BitwiseOr => "$0 | $1",
            BitwiseXor => "$0 ^ $1",
            Invert => "~$0",
            LeftShift => "$0 << $1",
            RightShift => "$0 >> $1",
            Modf => "modf($0, &$o1)",
            Divmod => "_divmod($0, $1, &$o1)",
            Frexp => "frexp($0, &$o1)",
            Ldexp => "ldexp($0, $1)",
            Where => "$0 ? $1 : $2",
            Clip => "_minimum(_maximum($0, $1), $2)",
        }
    }
}

fn bool_rejection(ufunc: Ufunc) -> String {
    match ufunc {
        Ufunc::Negative => "The numpy boolean negative, the `-` operator, is not supported, use the `~` operator or the logical_not function instead.".to_string(),
        _ => "numpy boolean subtract, the `-` operator, is not supported, use the bitwise_xor, the `^` operator, or the logical_xor function instead.".to_string(),
    }
}

impl fmt::Display for Ufunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrays(dtypes: &[DType]) -> Vec<(DType, bool)> {
        dtypes.iter().map(|&d| (d, false)).collect()
    }

    #[test]
    fn test_catalogue_is_consistent() {
        for &u in Ufunc::ALL {
            assert_eq!(Ufunc::from_name(u.name()), Some(u));
            let operands = vec![(DType::Int32, false); u.nin()];
            if let Ok(lp) = u.resolve(&operands) {
                assert_eq!(lp.inputs.len(), u.nin(), "{u}");
                assert_eq!(lp.outputs.len(), u.nout(), "{u}");
            }
        }
        assert_eq!(Ufunc::from_name("divide"), Some(Ufunc::TrueDivide));
    }

    #[test]
    fn test_arith_loops() {
        let lp = Ufunc::Add.resolve(&arrays(&[DType::Int8, DType::Uint8])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Int16]);
        let lp = Ufunc::Add.resolve(&arrays(&[DType::Bool, DType::Bool])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Bool]);
        let lp = Ufunc::Power.resolve(&arrays(&[DType::Bool, DType::Bool])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Int8]);
    }

    #[test]
    fn test_scalar_operands_follow_category() {
        let lp = Ufunc::Multiply
            .resolve(&[(DType::Int8, false), (DType::Int64, true)])
            .unwrap();
        assert_eq!(lp.outputs, vec![DType::Int8]);
        let lp = Ufunc::Multiply
            .resolve(&[(DType::Int8, false), (DType::Float64, true)])
            .unwrap();
        assert_eq!(lp.outputs, vec![DType::Float64]);
        let lp = Ufunc::Add
            .resolve(&[(DType::Float32, false), (DType::Float64, true)])
            .unwrap();
        assert_eq!(lp.outputs, vec![DType::Float32]);
    }

    #[test]
    fn test_float_and_divide_loops() {
        let lp = Ufunc::Sqrt.resolve(&arrays(&[DType::Uint8])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Float16]);
        let lp = Ufunc::Sqrt.resolve(&arrays(&[DType::Int16])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Float32]);
        let lp = Ufunc::TrueDivide.resolve(&arrays(&[DType::Int8, DType::Int8])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Float64]);
        let lp = Ufunc::TrueDivide
            .resolve(&arrays(&[DType::Float16, DType::Float16]))
            .unwrap();
        assert_eq!(lp.outputs, vec![DType::Float16]);
    }

    #[test]
    fn test_rejections() {
        let err = Ufunc::Subtract
            .resolve(&arrays(&[DType::Bool, DType::Bool]))
            .unwrap_err();
        assert!(err.to_string().contains("boolean subtract"));
        let err = Ufunc::Negative.resolve(&arrays(&[DType::Bool])).unwrap_err();
        assert!(err.to_string().contains("boolean negative"));
        let err = Ufunc::BitwiseAnd
            .resolve(&arrays(&[DType::Float32, DType::Int32]))
            .unwrap_err();
        assert!(err.to_string().starts_with("ufunc 'bitwise_and' not supported"));
        assert!(Ufunc::LeftShift.resolve(&arrays(&[DType::Float64, DType::Int8])).is_err());
    }

    #[test]
    fn test_special_loops() {
        let lp = Ufunc::Frexp.resolve(&arrays(&[DType::Float32])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Float32, DType::Int32]);
        let lp = Ufunc::Ldexp.resolve(&arrays(&[DType::Int8, DType::Int32])).unwrap();
        assert_eq!(lp.inputs, vec![DType::Float16, DType::Int64]);
        assert!(Ufunc::Ldexp.resolve(&arrays(&[DType::Float64, DType::Float64])).is_err());
        let lp = Ufunc::Where
            .resolve(&arrays(&[DType::Float64, DType::Int8, DType::Int32]))
            .unwrap();
        assert_eq!(lp.inputs, vec![DType::Bool, DType::Int32, DType::Int32]);
        let lp = Ufunc::Divmod.resolve(&arrays(&[DType::Int16, DType::Int16])).unwrap();
        assert_eq!(lp.outputs, vec![DType::Int16, DType::Int16]);
    }

    #[test]
    fn test_compare_and_logical() {
        let lp = Ufunc::Less.resolve(&arrays(&[DType::Int8, DType::Float32])).unwrap();
        assert_eq!(lp.inputs, vec![DType::Float32, DType::Float32]);
        assert_eq!(lp.outputs, vec![DType::Bool]);
        let lp = Ufunc::LogicalXor.resolve(&arrays(&[DType::Int8, DType::Float32])).unwrap();
        assert_eq!(lp.inputs, vec![DType::Bool, DType::Bool]);
    }
}
