//! Tracing infrastructure for capturing operations.
//!
//! The [`Tracer`] is an [`ArrayModule`] whose values are placeholders. Every
//! operation a body performs on them is checked for dtype and rank, then
//! recorded into a [`GraphBuilder`] instead of computed.
//!
//! A [`TraceValue`] names a *variable*, not a value. In-place operations bind
//! the variable to a fresh SSA value, so every handle cloned from it observes
//! the update, mirroring how aliases of one array observe an in-place write.

use crate::error::{FuseError, FuseResult, ShapeError, TraceError};
use crate::module::{ArgKind, ArrayModule, Returned};
use crate::ops::eager::check_out;
use crate::ops::reduce::ReduceOp;
use crate::ops::ufunc::Ufunc;
use crate::scalar::Scalar;
use crate::shape::Region;
use crate::trace::ir::{FusionGraph, GraphBuilder, Op, OutputSlot, ValueId};
use crate::DType;
use std::cell::RefCell;

/// Placeholder for a value inside a traced body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceValue {
    var: usize,
    dtype: DType,
    ndim: usize,
    kind: ArgKind,
}

impl TraceValue {
    /// Dtype of the placeholder.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Rank of the placeholder.
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Array or scalar.
    pub fn kind(&self) -> ArgKind {
        self.kind
    }
}

#[derive(Debug, Default)]
struct TraceState {
    builder: GraphBuilder,
    /// Current value of each variable.
    vars: Vec<ValueId>,
    /// Variable bound to each non-absent parameter.
    param_vars: Vec<Option<usize>>,
}

impl TraceState {
    fn bind(&mut self, value: ValueId) -> usize {
        self.vars.push(value);
        self.vars.len() - 1
    }

    fn current(&self, v: &TraceValue) -> ValueId {
        self.vars[v.var]
    }

    fn wrap(&mut self, value: ValueId) -> TraceValue {
        let info = self.builder.value(value);
        let (dtype, ndim, kind) = (info.dtype, info.ndim, info.kind);
        TraceValue {
            var: self.bind(value),
            dtype,
            ndim,
            kind,
        }
    }
}

/// Records a fused body into a [`FusionGraph`].
#[derive(Debug)]
pub struct Tracer {
    state: RefCell<TraceState>,
    backend: &'static str,
}

impl Tracer {
    /// Create a tracer for a body compiled for `backend`.
    pub fn new(backend: &'static str) -> Self {
        Self {
            state: RefCell::new(TraceState::default()),
            backend,
        }
    }

    /// Declares the next positional parameter and returns its placeholder.
    ///
    /// Absent arguments are declared too, but have no placeholder.
    pub fn param(&self, kind: ArgKind, dtype: Option<DType>, ndim: usize) -> Option<TraceValue> {
        let mut state = self.state.borrow_mut();
        let value = state.builder.param(kind, dtype, ndim);
        let traced = value.map(|v| state.wrap(v));
        state.param_vars.push(traced.as_ref().map(|t| t.var));
        traced
    }

    /// Ends the trace, turning what the body returned into graph outputs.
    ///
    /// A returned array parameter, modified or not, is returned as the
    /// caller's own handle. Array parameters whose variable ended up bound
    /// to a new value are written back.
    pub fn finish(self, name: String, returned: Returned<TraceValue>) -> FusionGraph {
        let state = self.state.into_inner();
        let arity = returned.arity();
        let param_of_var = |var: usize| {
            state
                .param_vars
                .iter()
                .position(|&pv| pv == Some(var))
                .filter(|&i| state.builder.params()[i].kind == ArgKind::Array)
        };

        let outputs = returned
            .into_vec()
            .iter()
            .map(|v| match param_of_var(v.var) {
                Some(i) => OutputSlot::Param(i),
                None => OutputSlot::Value(state.current(v)),
            })
            .collect();

        let write_backs = state
            .builder
            .params()
            .iter()
            .zip(&state.param_vars)
            .enumerate()
            .filter(|(_, (p, _))| p.kind == ArgKind::Array)
            .filter_map(|(i, (p, var))| {
                let now = state.vars[(*var)?];
                (Some(now) != p.value).then_some((i, now))
            })
            .collect();

        state.builder.finish(name, outputs, arity, write_backs)
    }

    fn record(
        &self,
        op: Op,
        inputs: &[&TraceValue],
        targets: &[&TraceValue],
        outputs: &[(DType, usize, ArgKind)],
    ) -> Vec<ValueId> {
        let mut state = self.state.borrow_mut();
        let inputs = inputs.iter().map(|v| state.current(v)).collect();
        let targets = targets.iter().map(|v| state.current(v)).collect();
        state.builder.push_node(op, inputs, targets, outputs)
    }

    fn wrap_all(&self, values: Vec<ValueId>) -> Vec<TraceValue> {
        let mut state = self.state.borrow_mut();
        values.into_iter().map(|v| state.wrap(v)).collect()
    }

    fn rebind(&self, target: &TraceValue, value: ValueId) {
        self.state.borrow_mut().vars[target.var] = value;
    }
}

fn operand_meta(inputs: &[&TraceValue]) -> Vec<(DType, bool)> {
    inputs
        .iter()
        .map(|v| (v.dtype, v.kind == ArgKind::Scalar))
        .collect()
}

impl ArrayModule for Tracer {
    type Value = TraceValue;

    fn backend_tag(&self) -> &'static str {
        self.backend
    }

    fn scalar(&self, value: Scalar) -> TraceValue {
        let mut state = self.state.borrow_mut();
        let id = state.builder.constant(value);
        state.wrap(id)
    }

    fn dtype_of(&self, value: &TraceValue) -> DType {
        value.dtype
    }

    fn ndim(&self, value: &TraceValue) -> usize {
        value.ndim
    }

    fn kind_of(&self, value: &TraceValue) -> ArgKind {
        value.kind
    }

    fn ufunc(&self, ufunc: Ufunc, inputs: &[&TraceValue]) -> FuseResult<Vec<TraceValue>> {
        let lp = ufunc.resolve(&operand_meta(inputs))?;
        let ndim = inputs.iter().map(|v| v.ndim).max().unwrap_or(0);
        let kind = if inputs.iter().all(|v| v.kind == ArgKind::Scalar) {
            ArgKind::Scalar
        } else {
            ArgKind::Array
        };
        let outputs: Vec<_> = lp.outputs.iter().map(|&d| (d, ndim, kind)).collect();
        let ids = self.record(Op::Ufunc { ufunc, lp }, inputs, &[], &outputs);
        Ok(self.wrap_all(ids))
    }

    fn ufunc_out(
        &self,
        ufunc: Ufunc,
        inputs: &[&TraceValue],
        outs: &[&TraceValue],
    ) -> FuseResult<Vec<TraceValue>> {
        let lp = ufunc.resolve(&operand_meta(inputs))?;
        let out_dtypes: Vec<Option<DType>> = outs
            .iter()
            .map(|o| (o.kind == ArgKind::Array).then_some(o.dtype))
            .collect();
        check_out(ufunc, &lp, &out_dtypes)?;
        let outputs: Vec<_> = outs
            .iter()
            .map(|o| (o.dtype, o.ndim, ArgKind::Array))
            .collect();
        let ids = self.record(Op::Ufunc { ufunc, lp }, inputs, outs, &outputs);
        for (out, id) in outs.iter().zip(ids) {
            self.rebind(out, id);
        }
        Ok(outs.iter().map(|o| (*o).clone()).collect())
    }

    fn reduce(
        &self,
        op: ReduceOp,
        value: &TraceValue,
        axis: Option<usize>,
    ) -> FuseResult<TraceValue> {
        let ndim = match axis {
            None => 0,
            Some(axis) if axis < value.ndim => value.ndim - 1,
            Some(axis) => {
                return Err(ShapeError::AxisOutOfBounds {
                    axis,
                    ndim: value.ndim,
                }
                .into())
            }
        };
        let output = (op.output_dtype(value.dtype), ndim, ArgKind::Array);
        let ids = self.record(Op::Reduce { op, axis }, &[value], &[], &[output]);
        first(self.wrap_all(ids))
    }

    fn astype(&self, value: &TraceValue, dtype: DType) -> FuseResult<TraceValue> {
        let ids = self.record(Op::Cast(dtype), &[value], &[], &[(dtype, value.ndim, value.kind)]);
        first(self.wrap_all(ids))
    }

    fn assign(&self, target: &TraceValue, src: &TraceValue, region: Region) -> FuseResult<()> {
        if target.kind != ArgKind::Array {
            return Err(FuseError::scalar_assignment());
        }
        if matches!(region, Region::Rows { .. }) && target.ndim == 0 {
            return Err(ShapeError::TooManyIndices.into());
        }
        let output = (target.dtype, target.ndim, ArgKind::Array);
        let ids = self.record(Op::Assign(region), &[src], &[target], &[output]);
        for id in ids {
            self.rebind(target, id);
        }
        Ok(())
    }

    fn to_bool(&self, _value: &TraceValue) -> FuseResult<bool> {
        Err(TraceError::DataDependent { what: "bool" }.into())
    }

    fn item(&self, _value: &TraceValue) -> FuseResult<Scalar> {
        Err(TraceError::DataDependent { what: "item" }.into())
    }
}

fn first(values: Vec<TraceValue>) -> FuseResult<TraceValue> {
    values
        .into_iter()
        .next()
        .ok_or_else(|| TraceError::Unsupported("operation produced no value".into()).into())
}
