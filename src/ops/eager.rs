//! Eager (unfused) evaluation.
//!
//! [`Eager`] runs a body one operation at a time on real arrays, allocating
//! every intermediate. It is the reference a fused call must agree with:
//! same result dtypes, same values, same error messages.

use crate::buffer::Buffer;
use crate::device;
use crate::error::{FuseError, FuseResult, ShapeError};
use crate::module::{ArgKind, ArrayModule, Operand};
use crate::ops::math;
use crate::ops::reduce::ReduceOp;
use crate::ops::ufunc::{Loop, Ufunc};
use crate::scalar::{Elem, Scalar};
use crate::shape::Region;
use crate::{Array, DType, Shape};

/// Array module that computes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Eager;

/// Operand data as a flat element vector with its shape.
fn materialize(op: &Operand) -> (Vec<Elem>, Shape) {
    match op {
        Operand::Array(a) => (a.elems(), a.shape().clone()),
        Operand::Scalar(s) => (vec![s.elem()], Shape::scalar()),
    }
}

fn resolve(ufunc: Ufunc, inputs: &[&Operand]) -> FuseResult<Loop> {
    let meta: Vec<(DType, bool)> = inputs.iter().map(|o| (o.dtype(), o.is_scalar())).collect();
    ufunc.resolve(&meta)
}

/// Runs the inner loop over `shape`, returning one buffer per output.
fn run_loop(ufunc: Ufunc, lp: &Loop, inputs: &[&Operand], shape: &Shape) -> Vec<Vec<Elem>> {
    let data: Vec<(Vec<Elem>, Shape)> = inputs.iter().map(|o| materialize(o)).collect();
    let nout = lp.outputs.len();
    let size = shape.size();
    let mut outputs: Vec<Vec<Elem>> = (0..nout).map(|_| Vec::with_capacity(size)).collect();
    let mut index = Vec::with_capacity(shape.ndim());
    let mut args = Vec::with_capacity(inputs.len());
    for flat in 0..size {
        shape.unravel_into(flat, &mut index);
        args.clear();
        for ((values, in_shape), &dtype) in data.iter().zip(&lp.inputs) {
            args.push(values[in_shape.unbroadcast_offset(&index)].cast(dtype));
        }
        let result = math::apply(ufunc, lp, &args);
        for (out, value) in outputs.iter_mut().zip(result) {
            out.push(value);
        }
    }
    outputs
}

/// Applies a ufunc to operands.
///
/// The result is a scalar when every operand is a scalar, an array of the
/// broadcast shape otherwise.
pub fn apply_ufunc(ufunc: Ufunc, inputs: &[&Operand]) -> FuseResult<Vec<Operand>> {
    let lp = resolve(ufunc, inputs)?;
    let shapes: Vec<Shape> = inputs.iter().map(|o| o.shape()).collect();
    let refs: Vec<&Shape> = shapes.iter().collect();
    let shape = Shape::broadcast_all(&refs)?;
    let all_scalar = inputs.iter().all(|o| o.is_scalar());
    let outputs = run_loop(ufunc, &lp, inputs, &shape);
    Ok(outputs
        .into_iter()
        .zip(&lp.outputs)
        .map(|(data, &dtype)| {
            if all_scalar {
                Operand::Scalar(Scalar::new(dtype, data[0]))
            } else {
                let buffer = Buffer::from_elems_unchecked(data, dtype);
                Operand::Array(Array::from_buffer(buffer, shape.clone()))
            }
        })
        .collect())
}

/// Checks an `out=` write: targets must be arrays of the right count,
/// `same_kind` castable from the loop outputs, and shaped exactly like the
/// broadcast of inputs and targets.
pub(crate) fn check_out(
    ufunc: Ufunc,
    lp: &Loop,
    out_dtypes: &[Option<DType>],
) -> FuseResult<()> {
    if out_dtypes.len() != ufunc.nout() {
        return Err(FuseError::Type(format!(
            "ufunc '{}' expects {} output operands, got {}",
            ufunc.name(),
            ufunc.nout(),
            out_dtypes.len()
        )));
    }
    for (&from, to) in lp.outputs.iter().zip(out_dtypes) {
        let to = to.ok_or_else(FuseError::output_not_array)?;
        if !DType::can_cast_same_kind(from, to) {
            return Err(FuseError::output_cast(ufunc.name(), from, to));
        }
    }
    Ok(())
}

/// Shape check of an `out=` write, shared with the fused shape plan.
pub(crate) fn check_out_shapes(inputs: &[&Shape], outs: &[&Shape]) -> FuseResult<Shape> {
    let all: Vec<&Shape> = inputs.iter().chain(outs).copied().collect();
    let broadcast = Shape::broadcast_all(&all)?;
    for out in outs {
        if **out != broadcast {
            return Err(ShapeError::OutputMismatch {
                output: (*out).clone(),
                broadcast,
            }
            .into());
        }
    }
    Ok(broadcast)
}

/// Applies a ufunc writing into existing arrays.
pub fn apply_ufunc_out(
    ufunc: Ufunc,
    inputs: &[&Operand],
    outs: &[&Operand],
) -> FuseResult<Vec<Operand>> {
    let lp = resolve(ufunc, inputs)?;
    let out_dtypes: Vec<Option<DType>> = outs
        .iter()
        .map(|o| o.as_array().map(|a| a.dtype()))
        .collect();
    check_out(ufunc, &lp, &out_dtypes)?;
    let in_shapes: Vec<Shape> = inputs.iter().map(|o| o.shape()).collect();
    let out_shapes: Vec<Shape> = outs.iter().map(|o| o.shape()).collect();
    let shape = check_out_shapes(
        &in_shapes.iter().collect::<Vec<_>>(),
        &out_shapes.iter().collect::<Vec<_>>(),
    )?;
    let results = run_loop(ufunc, &lp, inputs, &shape);
    for (out, data) in outs.iter().zip(results) {
        if let Operand::Array(a) = out {
            a.buffer().overwrite(&data);
        }
    }
    Ok(outs.iter().map(|o| (*o).clone()).collect())
}

/// Reduces an operand; scalars reduce as 0-d arrays.
pub fn reduce(op: ReduceOp, value: &Operand, axis: Option<usize>) -> FuseResult<Array> {
    let (data, shape) = materialize(value);
    let dtype = value.dtype();
    let (out, out_shape) = op.reduce_elems(&data, &shape, dtype, axis)?;
    let buffer = Buffer::from_elems_unchecked(out, op.output_dtype(dtype));
    Ok(Array::from_buffer(buffer, out_shape))
}

/// Writes `src` into `region` of `target` with unsafe casting.
pub fn assign(target: &Operand, src: &Operand, region: Region) -> FuseResult<()> {
    let target = target.as_array().ok_or_else(FuseError::scalar_assignment)?;
    let region_shape = region.check_source(&src.shape(), target.shape())?;
    let (start, _) = region.rows(target.shape());
    let row: usize = target.shape().as_slice().iter().skip(1).product();
    let (values, src_shape) = materialize(src);
    let dtype = target.dtype();
    let mut index = Vec::with_capacity(region_shape.ndim());
    let mut guard = target.buffer().write();
    for flat in 0..region_shape.size() {
        region_shape.unravel_into(flat, &mut index);
        guard[start * row + flat] = values[src_shape.unbroadcast_offset(&index)].cast(dtype);
    }
    Ok(())
}

impl ArrayModule for Eager {
    type Value = Operand;

    fn backend_tag(&self) -> &'static str {
        device::current_backend().name()
    }

    fn scalar(&self, value: Scalar) -> Operand {
        Operand::Scalar(value)
    }

    fn dtype_of(&self, value: &Operand) -> DType {
        value.dtype()
    }

    fn ndim(&self, value: &Operand) -> usize {
        value.ndim()
    }

    fn kind_of(&self, value: &Operand) -> ArgKind {
        value.kind()
    }

    fn ufunc(&self, ufunc: Ufunc, inputs: &[&Operand]) -> FuseResult<Vec<Operand>> {
        apply_ufunc(ufunc, inputs)
    }

    fn ufunc_out(
        &self,
        ufunc: Ufunc,
        inputs: &[&Operand],
        outs: &[&Operand],
    ) -> FuseResult<Vec<Operand>> {
        apply_ufunc_out(ufunc, inputs, outs)
    }

    fn reduce(&self, op: ReduceOp, value: &Operand, axis: Option<usize>) -> FuseResult<Operand> {
        reduce(op, value, axis).map(Operand::Array)
    }

    fn astype(&self, value: &Operand, dtype: DType) -> FuseResult<Operand> {
        Ok(match value {
            Operand::Array(a) => Operand::Array(a.astype(dtype)),
            Operand::Scalar(s) => Operand::Scalar(s.astype(dtype)),
        })
    }

    fn assign(&self, target: &Operand, src: &Operand, region: Region) -> FuseResult<()> {
        assign(target, src, region)
    }

    fn to_bool(&self, value: &Operand) -> FuseResult<bool> {
        match value {
            Operand::Scalar(s) => Ok(s.to_bool()),
            Operand::Array(a) => a.item().map(|s| s.to_bool()).ok_or_else(|| {
                FuseError::Type(
                    "The truth value of an array with more than one element is ambiguous. Use a.any() or a.all()"
                        .to_string(),
                )
            }),
        }
    }

    fn item(&self, value: &Operand) -> FuseResult<Scalar> {
        match value {
            Operand::Scalar(s) => Ok(*s),
            Operand::Array(a) => a.item().ok_or_else(|| {
                FuseError::Type("can only convert an array of size 1 to a Python scalar".to_string())
            }),
        }
    }
}
