//! The array-module abstraction fused bodies are written against.
//!
//! A body is generic over [`ArrayModule`]. Run against [`Eager`] it
//! computes with real arrays, one operation at a time; run against the
//! tracer it records a graph instead. The same body therefore defines both
//! the fused kernel and the reference it must agree with.
//!
//! [`Eager`]: crate::ops::eager::Eager

use crate::error::{FuseResult, TraceError};
use crate::ops::reduce::ReduceOp;
use crate::ops::ufunc::Ufunc;
use crate::shape::Region;
use crate::trace::fused::Fused;
use crate::{Array, DType, Scalar, Shape};

/// What a positional argument is, as far as the signature is concerned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// An array.
    Array,
    /// A scalar value.
    Scalar,
    /// No value was passed.
    Absent,
}

/// A concrete value: an array or a scalar.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Array value.
    Array(Array),
    /// Scalar value.
    Scalar(Scalar),
}

impl Operand {
    /// Dtype of the value.
    pub fn dtype(&self) -> DType {
        match self {
            Operand::Array(a) => a.dtype(),
            Operand::Scalar(s) => s.dtype(),
        }
    }

    /// Shape of the value; scalars are 0-d.
    pub fn shape(&self) -> Shape {
        match self {
            Operand::Array(a) => a.shape().clone(),
            Operand::Scalar(_) => Shape::scalar(),
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        match self {
            Operand::Array(a) => a.ndim(),
            Operand::Scalar(_) => 0,
        }
    }

    /// Returns true for scalars.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Operand::Scalar(_))
    }

    /// Kind of the value.
    pub fn kind(&self) -> ArgKind {
        match self {
            Operand::Array(_) => ArgKind::Array,
            Operand::Scalar(_) => ArgKind::Scalar,
        }
    }

    /// The array, if this is one.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Operand::Array(a) => Some(a),
            Operand::Scalar(_) => None,
        }
    }

    /// The scalar, if this is one.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Operand::Array(_) => None,
            Operand::Scalar(s) => Some(*s),
        }
    }

    /// Elements as `f64`.
    pub fn to_vec_f64(&self) -> Vec<f64> {
        match self {
            Operand::Array(a) => a.to_vec_f64(),
            Operand::Scalar(s) => vec![s.to_f64()],
        }
    }

    /// Elements as `i64`.
    pub fn to_vec_i64(&self) -> Vec<i64> {
        match self {
            Operand::Array(a) => a.to_vec_i64(),
            Operand::Scalar(s) => vec![s.to_i64()],
        }
    }
}

impl From<Array> for Operand {
    fn from(a: Array) -> Self {
        Operand::Array(a)
    }
}

impl From<&Array> for Operand {
    fn from(a: &Array) -> Self {
        Operand::Array(a.clone())
    }
}

macro_rules! from_scalar_like {
    ($target:ident: $($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for $target {
                fn from(value: $ty) -> Self {
                    $target::Scalar(Scalar::from(value))
                }
            }
        )*
    };
}

from_scalar_like!(Operand: bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, half::f16);

impl From<Scalar> for Operand {
    fn from(s: Scalar) -> Self {
        Operand::Scalar(s)
    }
}

/// A positional argument of a fused call.
#[derive(Debug, Clone)]
pub enum Arg {
    /// Array argument; the fused body may update it in place.
    Array(Array),
    /// Scalar argument.
    Scalar(Scalar),
    /// The "no value" sentinel.
    Absent,
}

impl Arg {
    /// Kind of the argument.
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Array(_) => ArgKind::Array,
            Arg::Scalar(_) => ArgKind::Scalar,
            Arg::Absent => ArgKind::Absent,
        }
    }

    /// Dtype of the argument, if any.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Arg::Array(a) => Some(a.dtype()),
            Arg::Scalar(s) => Some(s.dtype()),
            Arg::Absent => None,
        }
    }

    /// Number of dimensions; scalars and absent arguments are 0-d.
    pub fn ndim(&self) -> usize {
        match self {
            Arg::Array(a) => a.ndim(),
            _ => 0,
        }
    }

    /// Shape of the argument; scalars and absent arguments are 0-d.
    pub fn shape(&self) -> Shape {
        match self {
            Arg::Array(a) => a.shape().clone(),
            _ => Shape::scalar(),
        }
    }

    /// Converts into an operand; `None` for the absent sentinel.
    pub fn to_operand(&self) -> Option<Operand> {
        match self {
            Arg::Array(a) => Some(Operand::Array(a.clone())),
            Arg::Scalar(s) => Some(Operand::Scalar(*s)),
            Arg::Absent => None,
        }
    }
}

impl From<Array> for Arg {
    fn from(a: Array) -> Self {
        Arg::Array(a)
    }
}

impl From<&Array> for Arg {
    fn from(a: &Array) -> Self {
        Arg::Array(a.clone())
    }
}

impl From<Operand> for Arg {
    fn from(op: Operand) -> Self {
        match op {
            Operand::Array(a) => Arg::Array(a),
            Operand::Scalar(s) => Arg::Scalar(s),
        }
    }
}

from_scalar_like!(Arg: bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, half::f16);

impl From<Scalar> for Arg {
    fn from(s: Scalar) -> Self {
        Arg::Scalar(s)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Absent, Into::into)
    }
}

/// What a body returned. The variant and tuple length are fixed per
/// compiled signature.
#[derive(Debug, Clone)]
pub enum Returned<V> {
    /// Nothing was returned.
    None,
    /// A single value.
    Single(V),
    /// A tuple of values, possibly empty.
    Tuple(Vec<V>),
}

/// Shape of a return value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Arity {
    /// No return value.
    None,
    /// One bare value.
    Single,
    /// Tuple of the given length.
    Tuple(usize),
}

impl<V> Returned<V> {
    /// Arity of the value.
    pub fn arity(&self) -> Arity {
        match self {
            Returned::None => Arity::None,
            Returned::Single(_) => Arity::Single,
            Returned::Tuple(v) => Arity::Tuple(v.len()),
        }
    }

    /// Returned values in order.
    pub fn into_vec(self) -> Vec<V> {
        match self {
            Returned::None => Vec::new(),
            Returned::Single(v) => vec![v],
            Returned::Tuple(v) => v,
        }
    }

    /// Rebuilds a value of `arity` from its parts.
    pub fn from_parts(arity: Arity, mut parts: Vec<V>) -> Self {
        match arity {
            Arity::None => Returned::None,
            Arity::Single => parts.pop().map_or(Returned::None, Returned::Single),
            Arity::Tuple(_) => Returned::Tuple(parts),
        }
    }

    /// The single value, if this is one.
    pub fn single(self) -> Option<V> {
        match self {
            Returned::Single(v) => Some(v),
            _ => None,
        }
    }
}

/// The user function of a fused callable.
///
/// Bodies are generic over the array module so one definition serves the
/// tracer and the eager evaluator. Absent arguments arrive as `None`;
/// branching on that (or on dtype, rank and kind) is resolved while tracing.
///
/// # Examples
///
/// ```
/// use fuse_rs::{required, ArrayModule, FuseResult, FusedBody, Returned};
///
/// struct Axpy;
///
/// impl FusedBody for Axpy {
///     fn name(&self) -> &str {
///         "axpy"
///     }
///
///     fn call<M: ArrayModule>(
///         &self,
///         xp: &M,
///         args: &[Option<M::Value>],
///     ) -> FuseResult<Returned<M::Value>> {
///         let a = required(args, 0)?;
///         let x = required(args, 1)?;
///         let y = required(args, 2)?;
///         let ax = xp.multiply(&a, &x)?;
///         Ok(Returned::Single(xp.add(&ax, &y)?))
///     }
/// }
/// ```
pub trait FusedBody: Send + Sync {
    /// Name of the function; the default kernel name.
    fn name(&self) -> &str;

    /// Documentation of the function.
    fn doc(&self) -> Option<&str> {
        None
    }

    /// Runs the body against `xp`.
    fn call<M: ArrayModule>(
        &self,
        xp: &M,
        args: &[Option<M::Value>],
    ) -> FuseResult<Returned<M::Value>>;
}

/// Fetches a required positional argument.
pub fn required<V: Clone>(args: &[Option<V>], index: usize) -> FuseResult<V> {
    args.get(index)
        .and_then(|a| a.clone())
        .ok_or_else(|| TraceError::MissingArgument { index }.into())
}

macro_rules! unary_methods {
    ($($name:ident => $ufunc:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($name), "(x)`.")]
            fn $name(&self, x: &Self::Value) -> FuseResult<Self::Value> {
                self.apply(Ufunc::$ufunc, &[x])
            }
        )*
    };
}

macro_rules! binary_methods {
    ($($name:ident => $ufunc:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($name), "(a, b)`.")]
            fn $name(&self, a: &Self::Value, b: &Self::Value) -> FuseResult<Self::Value> {
                self.apply(Ufunc::$ufunc, &[a, b])
            }
        )*
    };
}

macro_rules! inplace_methods {
    ($($name:ident => $ufunc:ident),* $(,)?) => {
        $(
            #[doc = concat!("Augmented assignment through `", stringify!($ufunc), "`.")]
            fn $name(&self, target: &Self::Value, other: &Self::Value) -> FuseResult<Self::Value> {
                self.inplace(Ufunc::$ufunc, target, other)
            }
        )*
    };
}

macro_rules! reduce_methods {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($name), "` over `axis`, or over all axes when `None`.")]
            fn $name(&self, x: &Self::Value, axis: Option<usize>) -> FuseResult<Self::Value> {
                self.reduce(ReduceOp::$op, x, axis)
            }
        )*
    };
}

/// Operations available to fused bodies.
///
/// Implementors provide the primitives; everything else is derived.
pub trait ArrayModule {
    /// Values flowing through the body.
    type Value: Clone;

    /// Tag of the backend this module targets.
    fn backend_tag(&self) -> &'static str;

    /// A literal constant.
    fn scalar(&self, value: Scalar) -> Self::Value;

    /// Dtype of a value.
    fn dtype_of(&self, value: &Self::Value) -> DType;

    /// Rank of a value.
    fn ndim(&self, value: &Self::Value) -> usize;

    /// Whether a value is an array or a scalar.
    fn kind_of(&self, value: &Self::Value) -> ArgKind;

    /// Applies a ufunc, returning one value per ufunc output.
    fn ufunc(&self, ufunc: Ufunc, inputs: &[&Self::Value]) -> FuseResult<Vec<Self::Value>>;

    /// Applies a ufunc writing into existing arrays (`out=`). Returns the
    /// targets.
    fn ufunc_out(
        &self,
        ufunc: Ufunc,
        inputs: &[&Self::Value],
        outs: &[&Self::Value],
    ) -> FuseResult<Vec<Self::Value>>;

    /// Reduces along `axis`, or over all axes when `None`. Always yields an
    /// array.
    fn reduce(&self, op: ReduceOp, value: &Self::Value, axis: Option<usize>)
        -> FuseResult<Self::Value>;

    /// Converts to `dtype`, producing a new value.
    fn astype(&self, value: &Self::Value, dtype: DType) -> FuseResult<Self::Value>;

    /// Overwrites `region` of the array `target` with `src`.
    fn assign(&self, target: &Self::Value, src: &Self::Value, region: Region) -> FuseResult<()>;

    /// Truthiness of a value with exactly one element.
    fn to_bool(&self, value: &Self::Value) -> FuseResult<bool>;

    /// The single element of a value.
    fn item(&self, value: &Self::Value) -> FuseResult<Scalar>;

    /// Calls another fused function from inside a body.
    ///
    /// The default runs the callee body against this module, so a traced
    /// call splices the callee's operations into the caller's graph.
    fn call<B: FusedBody>(
        &self,
        f: &Fused<B>,
        args: &[Option<Self::Value>],
    ) -> FuseResult<Returned<Self::Value>>
    where
        Self: Sized,
    {
        f.body().call(self, args)
    }

    /// A literal constant from a Rust primitive.
    fn constant<S: Into<Scalar>>(&self, value: S) -> Self::Value
    where
        Self: Sized,
    {
        self.scalar(value.into())
    }

    /// Applies a ufunc and keeps its first output.
    fn apply(&self, ufunc: Ufunc, inputs: &[&Self::Value]) -> FuseResult<Self::Value> {
        self.ufunc(ufunc, inputs)?.into_iter().next().ok_or_else(|| {
            TraceError::Unsupported(format!("ufunc '{ufunc}' produced no output")).into()
        })
    }

    /// Augmented assignment `target op= other`.
    ///
    /// Arrays are updated in place and the same handle is returned. Scalars
    /// cannot be mutated, so the result is a new value the caller rebinds.
    fn inplace(
        &self,
        ufunc: Ufunc,
        target: &Self::Value,
        other: &Self::Value,
    ) -> FuseResult<Self::Value> {
        match self.kind_of(target) {
            ArgKind::Array => {
                self.ufunc_out(ufunc, &[target, other], &[target])?;
                Ok(target.clone())
            }
            _ => self.apply(ufunc, &[target, other]),
        }
    }

    binary_methods! {
        add => Add,
        subtract => Subtract,
        multiply => Multiply,
        true_divide => TrueDivide,
        floor_divide => FloorDivide,
        remainder => Remainder,
        fmod => Fmod,
        power => Power,
        maximum => Maximum,
        minimum => Minimum,
        fmax => Fmax,
        fmin => Fmin,
        arctan2 => Arctan2,
        hypot => Hypot,
        greater => Greater,
        greater_equal => GreaterEqual,
        less => Less,
        less_equal => LessEqual,
        equal => Equal,
        not_equal => NotEqual,
        logical_and => LogicalAnd,
        logical_or => LogicalOr,
        logical_xor => LogicalXor,
        bitwise_and => BitwiseAnd,
        bitwise_or => BitwiseOr,
        bitwise_xor => BitwiseXor,
        left_shift => LeftShift,
        right_shift => RightShift,
        ldexp => Ldexp,
    }

    unary_methods! {
        negative => Negative,
        absolute => Absolute,
        sign => Sign,
        square => Square,
        sqrt => Sqrt,
        exp => Exp,
        log => Log,
        sin => Sin,
        cos => Cos,
        tanh => Tanh,
        floor => Floor,
        ceil => Ceil,
        logical_not => LogicalNot,
        isnan => Isnan,
        invert => Invert,
    }

    inplace_methods! {
        iadd => Add,
        isub => Subtract,
        imul => Multiply,
        itruediv => TrueDivide,
        ifloordiv => FloorDivide,
        imod => Remainder,
        ipow => Power,
        iand => BitwiseAnd,
        ior => BitwiseOr,
        ixor => BitwiseXor,
        ilshift => LeftShift,
        irshift => RightShift,
    }

    reduce_methods! {
        sum => Sum,
        prod => Prod,
        amax => Max,
        amin => Min,
        all => All,
        any => Any,
    }

    /// Elementwise `cond ? x : y`.
    fn where_(
        &self,
        cond: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> FuseResult<Self::Value> {
        self.apply(Ufunc::Where, &[cond, x, y])
    }

    /// Limits values to `[lo, hi]`.
    fn clip(&self, x: &Self::Value, lo: &Self::Value, hi: &Self::Value) -> FuseResult<Self::Value> {
        self.apply(Ufunc::Clip, &[x, lo, hi])
    }

    /// Fractional and integral parts.
    fn modf(&self, x: &Self::Value) -> FuseResult<(Self::Value, Self::Value)> {
        pair(self.ufunc(Ufunc::Modf, &[x])?)
    }

    /// Floor quotient and remainder.
    fn divmod(&self, a: &Self::Value, b: &Self::Value) -> FuseResult<(Self::Value, Self::Value)> {
        pair(self.ufunc(Ufunc::Divmod, &[a, b])?)
    }

    /// Mantissa and base-two exponent.
    fn frexp(&self, x: &Self::Value) -> FuseResult<(Self::Value, Self::Value)> {
        pair(self.ufunc(Ufunc::Frexp, &[x])?)
    }

    /// `target[...] = src`.
    fn setitem(&self, target: &Self::Value, src: &Self::Value) -> FuseResult<()> {
        self.assign(target, src, Region::Full)
    }

    /// `target[start:stop] = src` along the leading axis.
    fn setitem_rows(
        &self,
        target: &Self::Value,
        start: usize,
        stop: usize,
        src: &Self::Value,
    ) -> FuseResult<()> {
        self.assign(target, src, Region::Rows { start, stop })
    }
}

fn pair<V>(outputs: Vec<V>) -> FuseResult<(V, V)> {
    let mut it = outputs.into_iter();
    match (it.next(), it.next()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(TraceError::Unsupported("ufunc returned fewer than two outputs".into()).into()),
    }
}
