//! Error types shared by eager evaluation, tracing and dispatch.
//!
//! Eager and fused evaluation build their shape and type errors through the
//! same constructors, so a fused call that fails reports exactly what the
//! unfused computation would have reported.

use crate::{DType, Shape};
use thiserror::Error;

/// Errors raised while tracing a fused body.
///
/// These are fatal to the compile attempt of one signature and are never
/// retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The body asked for a concrete value of a traced placeholder.
    #[error("not fusable: {what} of a traced value is data dependent and cannot be resolved while tracing")]
    DataDependent {
        /// The requested conversion (`bool`, `item`, ...).
        what: &'static str,
    },

    /// More than one live reduction in a single fused function.
    #[error("not fusable: a fused function may contain at most one reduction, found {first} and {second}")]
    MultipleReductions {
        /// Name of the first reduction.
        first: String,
        /// Name of the offending reduction.
        second: String,
    },

    /// A parameter the body requires was bound to the absent sentinel.
    #[error("not fusable: argument {index} is absent but used as a value")]
    MissingArgument {
        /// Positional index of the argument.
        index: usize,
    },

    /// A construct the tracer cannot express as a kernel.
    #[error("not fusable: {0}")]
    Unsupported(String),
}

/// Shape errors, worded like the array library reports them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Operand shapes cannot be broadcast together.
    #[error("operands could not be broadcast together with shapes {}", join_shapes(.shapes))]
    NotBroadcastable {
        /// Shapes of the operands, in argument order.
        shapes: Vec<Shape>,
    },

    /// An in-place target does not have the broadcast result shape.
    #[error("non-broadcastable output operand with shape {output} doesn't match the broadcast shape {broadcast}")]
    OutputMismatch {
        /// Shape of the output operand.
        output: Shape,
        /// Shape the operation produces.
        broadcast: Shape,
    },

    /// Slice assignment from a source that does not broadcast into the target.
    #[error("could not broadcast input array from shape {src} into shape {dst}")]
    SetItem {
        /// Source shape.
        src: Shape,
        /// Target region shape.
        dst: Shape,
    },

    /// Reduction or slicing along a missing axis.
    #[error("axis {axis} is out of bounds for array of dimension {ndim}")]
    AxisOutOfBounds {
        /// Requested axis.
        axis: usize,
        /// Rank of the operand.
        ndim: usize,
    },

    /// Reduction of an empty array with an operator lacking an identity.
    #[error("zero-size array to reduction operation {op} which has no identity")]
    EmptyReduction {
        /// Reduction name.
        op: &'static str,
    },

    /// Row slicing of a 0-d array.
    #[error("too many indices for array: array is 0-dimensional, but 1 were indexed")]
    TooManyIndices,
}

fn join_shapes(shapes: &[Shape]) -> String {
    shapes
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Top-level error for fused and eager evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FuseError {
    /// Tracing failed.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// Broadcast or target shape mismatch.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// Unsupported operand types or casting violation.
    #[error("{0}")]
    Type(String),

    /// An in-place write is observable through another aliased argument.
    #[error("data race: {0}")]
    DataRace(String),

    /// Kernel compilation or launch failed in the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for fusion operations.
pub type FuseResult<T> = Result<T, FuseError>;

impl FuseError {
    /// A ufunc has no loop for the given input dtypes.
    pub fn no_loop(ufunc: &str) -> Self {
        FuseError::Type(format!(
            "ufunc '{ufunc}' not supported for the input types, and the inputs could not be safely coerced to any supported types according to the casting rule ''safe''"
        ))
    }

    /// Writing the loop result into an `out` target violates `same_kind`.
    pub fn output_cast(ufunc: &str, from: DType, to: DType) -> Self {
        FuseError::Type(format!(
            "Cannot cast ufunc '{ufunc}' output from dtype('{from}') to dtype('{to}') with casting rule 'same_kind'"
        ))
    }

    /// An `out` target that is not an array.
    pub fn output_not_array() -> Self {
        FuseError::Type("return arrays must be of ArrayType".to_string())
    }

    /// Item assignment into a scalar value.
    pub fn scalar_assignment() -> Self {
        FuseError::Type("scalar values do not support item assignment".to_string())
    }

    /// Builds a `NotBroadcastable` shape error.
    pub fn not_broadcastable(shapes: &[&Shape]) -> Self {
        ShapeError::NotBroadcastable {
            shapes: shapes.iter().map(|s| (*s).clone()).collect(),
        }
        .into()
    }

    /// Returns true for errors raised while tracing.
    pub fn is_trace(&self) -> bool {
        matches!(self, FuseError::Trace(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_message() {
        let a = Shape::new(vec![2, 3]);
        let b = Shape::new(vec![4]);
        let err = FuseError::not_broadcastable(&[&a, &b]);
        assert_eq!(
            err.to_string(),
            "operands could not be broadcast together with shapes (2, 3) (4,)"
        );
    }

    #[test]
    fn test_output_cast_message() {
        let err = FuseError::output_cast("add", DType::Float64, DType::Int64);
        assert_eq!(
            err.to_string(),
            "Cannot cast ufunc 'add' output from dtype('float64') to dtype('int64') with casting rule 'same_kind'"
        );
    }

    #[test]
    fn test_trace_errors_are_flagged() {
        let err: FuseError = TraceError::DataDependent { what: "bool" }.into();
        assert!(err.is_trace());
        assert!(err.to_string().starts_with("not fusable"));
    }
}
