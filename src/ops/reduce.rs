//! Reduction operations: identity, combine, output dtype and shape.

use crate::error::{FuseResult, ShapeError};
use crate::ops::math;
use crate::ops::ufunc::Ufunc;
use crate::scalar::Elem;
use crate::{DType, Shape};
use std::fmt;

/// Reduction operators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Sum of elements.
    Sum,
    /// Product of elements.
    Prod,
    /// Maximum element, NaN-propagating.
    Max,
    /// Minimum element, NaN-propagating.
    Min,
    /// True if every element is truthy.
    All,
    /// True if any element is truthy.
    Any,
}

impl ReduceOp {
    /// Name of the reduction as exposed to bodies.
    pub const fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Max => "amax",
            ReduceOp::Min => "amin",
            ReduceOp::All => "all",
            ReduceOp::Any => "any",
        }
    }

    /// Binary ufunc the reduction folds with.
    pub const fn ufunc(self) -> Ufunc {
        match self {
            ReduceOp::Sum => Ufunc::Add,
            ReduceOp::Prod => Ufunc::Multiply,
            ReduceOp::Max => Ufunc::Maximum,
            ReduceOp::Min => Ufunc::Minimum,
            ReduceOp::All => Ufunc::LogicalAnd,
            ReduceOp::Any => Ufunc::LogicalOr,
        }
    }

    /// Dtype of the result (and of the accumulator) for an input dtype.
    ///
    /// Sums and products of small integers accumulate in the platform
    /// integer, like the array library does.
    pub fn output_dtype(self, input: DType) -> DType {
        match self {
            ReduceOp::Sum | ReduceOp::Prod => {
                if input == DType::Bool || (input.is_signed() && input != DType::Int64) {
                    DType::Int64
                } else if input.is_unsigned() {
                    DType::Uint64
                } else {
                    input
                }
            }
            ReduceOp::Max | ReduceOp::Min => input,
            ReduceOp::All | ReduceOp::Any => DType::Bool,
        }
    }

    /// Identity element, if the reduction has one.
    pub fn identity(self, dtype: DType) -> Option<Elem> {
        let value = match self {
            ReduceOp::Sum => Elem::Int(0),
            ReduceOp::Prod => Elem::Int(1),
            ReduceOp::All => Elem::Bool(true),
            ReduceOp::Any => Elem::Bool(false),
            ReduceOp::Max | ReduceOp::Min => return None,
        };
        Some(value.cast(dtype))
    }

    /// Folds `value` into `acc`. Both are elements of `dtype`.
    #[inline]
    pub fn combine(self, dtype: DType, acc: Elem, value: Elem) -> Elem {
        math::combine(self.ufunc(), dtype, acc, value)
    }

    /// Result shape of reducing `shape` along `axis` (all axes when `None`).
    ///
    /// Fails when the axis does not exist, or when a reduction without
    /// identity would have to produce a value from zero elements.
    pub fn reduced_shape(self, shape: &Shape, axis: Option<usize>) -> FuseResult<Shape> {
        let (out, count) = match axis {
            None => (Shape::scalar(), shape.size()),
            Some(axis) => {
                let out = shape.remove_axis(axis)?;
                (out, shape.as_slice()[axis])
            }
        };
        if count == 0 && out.size() > 0 && self.identity(DType::Float64).is_none() {
            return Err(ShapeError::EmptyReduction {
                op: self.ufunc().name(),
            }
            .into());
        }
        Ok(out)
    }

    /// Reduces a contiguous buffer.
    pub fn reduce_elems(
        self,
        data: &[Elem],
        shape: &Shape,
        input: DType,
        axis: Option<usize>,
    ) -> FuseResult<(Vec<Elem>, Shape)> {
        let out_shape = self.reduced_shape(shape, axis)?;
        let dtype = self.output_dtype(input);
        let mut acc = Accumulator::new(self, dtype, out_shape.size());
        match axis {
            None => {
                for &value in data {
                    acc.push(0, value);
                }
            }
            Some(axis) => {
                let dims = shape.as_slice();
                let inner: usize = dims[axis + 1..].iter().product();
                let len = dims[axis];
                for (flat, &value) in data.iter().enumerate() {
                    let outer = flat / (inner * len);
                    let slot = outer * inner + flat % inner;
                    acc.push(slot, value);
                }
            }
        }
        Ok((acc.finish(), out_shape))
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running state of one reduction over many output slots.
#[derive(Debug)]
pub struct Accumulator {
    op: ReduceOp,
    dtype: DType,
    slots: Vec<Option<Elem>>,
}

impl Accumulator {
    /// Create an accumulator for `len` output elements of `dtype`.
    pub fn new(op: ReduceOp, dtype: DType, len: usize) -> Self {
        Self {
            op,
            dtype,
            slots: vec![op.identity(dtype); len],
        }
    }

    /// Folds one input element into output slot `slot`.
    #[inline]
    pub fn push(&mut self, slot: usize, value: Elem) {
        let value = value.cast(self.dtype);
        let cell = &mut self.slots[slot];
        *cell = Some(match *cell {
            Some(acc) => self.op.combine(self.dtype, acc, value),
            None => value,
        });
    }

    /// Final values. Slots that saw no element hold zero.
    pub fn finish(self) -> Vec<Elem> {
        let dtype = self.dtype;
        self.slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Elem::zero(dtype)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dtypes() {
        assert_eq!(ReduceOp::Sum.output_dtype(DType::Int8), DType::Int64);
        assert_eq!(ReduceOp::Sum.output_dtype(DType::Bool), DType::Int64);
        assert_eq!(ReduceOp::Prod.output_dtype(DType::Uint16), DType::Uint64);
        assert_eq!(ReduceOp::Sum.output_dtype(DType::Float32), DType::Float32);
        assert_eq!(ReduceOp::Max.output_dtype(DType::Int8), DType::Int8);
        assert_eq!(ReduceOp::Any.output_dtype(DType::Float64), DType::Bool);
    }

    #[test]
    fn test_reduce_axis() {
        let shape = Shape::from([2, 3]);
        let data: Vec<Elem> = (1..=6).map(Elem::Int).collect();
        let (out, s) = ReduceOp::Sum
            .reduce_elems(&data, &shape, DType::Int64, Some(0))
            .unwrap();
        assert_eq!(s, Shape::from([3]));
        assert_eq!(out, vec![Elem::Int(5), Elem::Int(7), Elem::Int(9)]);
        let (out, s) = ReduceOp::Max
            .reduce_elems(&data, &shape, DType::Int64, Some(1))
            .unwrap();
        assert_eq!(s, Shape::from([2]));
        assert_eq!(out, vec![Elem::Int(3), Elem::Int(6)]);
        let (out, s) = ReduceOp::Prod
            .reduce_elems(&data, &shape, DType::Int64, None)
            .unwrap();
        assert!(s.is_scalar());
        assert_eq!(out, vec![Elem::Int(720)]);
    }

    #[test]
    fn test_empty_reductions() {
        let empty = Shape::from([0, 3]);
        let (out, _) = ReduceOp::Sum
            .reduce_elems(&[], &empty, DType::Float64, None)
            .unwrap();
        assert_eq!(out, vec![Elem::Float(0.0)]);
        let err = ReduceOp::Max
            .reduce_elems(&[], &empty, DType::Float64, Some(0))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "zero-size array to reduction operation maximum which has no identity"
        );
        // Reducing a non-empty axis of an empty array is fine.
        assert!(ReduceOp::Max.reduced_shape(&empty, Some(1)).is_ok());
    }

    #[test]
    fn test_axis_out_of_bounds() {
        let err = ReduceOp::Sum
            .reduced_shape(&Shape::from([2]), Some(1))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "axis 1 is out of bounds for array of dimension 1"
        );
    }

    #[test]
    fn test_nan_propagation() {
        let data = [Elem::Float(1.0), Elem::Float(f64::NAN), Elem::Float(3.0)];
        let (out, _) = ReduceOp::Max
            .reduce_elems(&data, &Shape::from([3]), DType::Float64, None)
            .unwrap();
        assert!(out[0].as_f64().is_nan());
    }
}
