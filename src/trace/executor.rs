//! Tracing, compiling and launching fused functions.
//!
//! [`trace_and_compile`] runs once per signature: it traces the body
//! against placeholders, partitions the graph and compiles one kernel per
//! stage. [`launch`] runs on every call: it resolves shapes, checks for
//! aliasing hazards, launches the kernels and hands results back.
//!
//! A body that fails a type or shape check while tracing fails that way for
//! every call of its signature. The failure is kept in the bundle behind
//! the operations recorded before it, so a call whose arguments break one
//! of those earlier operations reports that error first, as eager
//! evaluation would.

use crate::backend::{CompiledKernel, KernelBackend, LaunchArgs};
use crate::buffer::Buffer;
use crate::error::{FuseError, FuseResult};
use crate::module::{Arg, ArgKind, FusedBody, Operand, Returned};
use crate::scalar::{Elem, Scalar};
use crate::trace::cache::Signature;
use crate::trace::codegen::{KernelSpec, OutputDest};
use crate::trace::fusion::{alias_hazards, partition_with_stats};
use crate::trace::infer::resolve_shapes;
use crate::trace::ir::{FusionGraph, OutputSlot, ValueDef, ValueId};
use crate::trace::tracer::Tracer;
use crate::{Array, Shape};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// The compiled form of one signature of a fused function.
pub struct CompiledBundle {
    /// Traced graph.
    pub graph: Arc<FusionGraph>,
    /// Kernels, in launch order.
    pub kernels: Vec<Arc<dyn CompiledKernel>>,
    /// Pairs `(written, other)` of array parameters that must not share
    /// storage.
    pub hazards: Vec<(usize, usize)>,
    /// Error the body raised while tracing, after the recorded operations.
    pub failure: Option<FuseError>,
}

impl CompiledBundle {
    /// Names of the kernels, in launch order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.kernels.iter().map(|k| k.spec().name.as_str()).collect()
    }
}

impl fmt::Debug for CompiledBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBundle")
            .field("graph", &self.graph.name)
            .field("kernels", &self.kernel_names())
            .field("hazards", &self.hazards)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Traces `body` for `signature` and compiles its kernels on `backend`.
///
/// The first kernel is named `kernel_name`; additional kernels get a
/// numeric suffix.
pub fn trace_and_compile<B: FusedBody>(
    body: &B,
    signature: &Signature,
    kernel_name: &str,
    backend: &dyn KernelBackend,
) -> FuseResult<CompiledBundle> {
    let tracer = Tracer::new(backend.name());
    let args: Vec<_> = signature
        .params
        .iter()
        .map(|p| tracer.param(p.kind, p.dtype, p.ndim))
        .collect();
    let returned = match body.call(&tracer, &args) {
        Ok(returned) => returned,
        Err(err) if !err.is_trace() => {
            debug!(kernel = kernel_name, %signature, error = %err, "trace stopped by a static error");
            let graph = tracer.finish(kernel_name.to_string(), Returned::None);
            return Ok(CompiledBundle {
                graph: Arc::new(graph),
                kernels: Vec::new(),
                hazards: Vec::new(),
                failure: Some(err),
            });
        }
        Err(err) => return Err(err),
    };
    let graph = Arc::new(tracer.finish(kernel_name.to_string(), returned));

    let (stages, stats) = partition_with_stats(&graph)?;
    debug!(
        kernel = kernel_name,
        %signature,
        traced = stats.traced_nodes,
        eliminated = stats.eliminated(),
        stages = stats.stages,
        "traced fused function"
    );

    let kernels = stages
        .into_iter()
        .enumerate()
        .map(|(i, stage)| {
            let name = match i {
                0 => kernel_name.to_string(),
                i => format!("{kernel_name}_{i}"),
            };
            backend.compile(&KernelSpec::new(name, stage, graph.clone()))
        })
        .collect::<FuseResult<Vec<_>>>()?;
    let hazards = alias_hazards(&graph);

    Ok(CompiledBundle {
        graph,
        kernels,
        hazards,
        failure: None,
    })
}

/// Rejects calls where an in-place write through one argument would be
/// observed out of order through another argument sharing its storage.
fn check_data_race(hazards: &[(usize, usize)], args: &[Arg]) -> FuseResult<()> {
    for &(written, other) in hazards {
        if let (Some(Arg::Array(a)), Some(Arg::Array(b))) = (args.get(written), args.get(other)) {
            if a.shares_buffer(b) {
                return Err(FuseError::DataRace(format!(
                    "argument {written} is updated in place but argument {other}, which shares its memory, is used after the update"
                )));
            }
        }
    }
    Ok(())
}

fn snapshot(arg: &Arg) -> Vec<Elem> {
    match arg {
        Arg::Array(a) => a.elems(),
        Arg::Scalar(s) => vec![s.elem()],
        Arg::Absent => Vec::new(),
    }
}

fn to_operand(arg: &Arg) -> FuseResult<Operand> {
    arg.to_operand()
        .ok_or_else(|| FuseError::Type("cannot return an absent argument".to_string()))
}

/// Runs a compiled bundle on concrete arguments.
pub fn launch(bundle: &CompiledBundle, args: &[Arg]) -> FuseResult<Returned<Operand>> {
    let graph = &bundle.graph;
    let param_shapes: Vec<Shape> = args.iter().map(Arg::shape).collect();
    let shapes = resolve_shapes(graph, &param_shapes)?;
    if let Some(err) = &bundle.failure {
        return Err(err.clone());
    }
    check_data_race(&bundle.hazards, args)?;

    let inputs: Vec<Vec<Elem>> = args.iter().map(snapshot).collect();
    let launch_args = LaunchArgs {
        inputs: &inputs,
        shapes: &shapes,
    };

    let mut results: FxHashMap<ValueId, Vec<Elem>> = FxHashMap::default();
    let mut write_backs: Vec<(usize, ValueId)> = Vec::new();
    for kernel in &bundle.kernels {
        trace!(kernel = %kernel.spec().name, "launch");
        let outputs = kernel.launch(&launch_args)?;
        for (spec, data) in kernel.spec().outputs.iter().zip(outputs) {
            if let OutputDest::InPlace(param) = spec.dest {
                write_backs.push((param, spec.value));
            }
            results.insert(spec.value, data);
        }
    }

    let mut commits = Vec::with_capacity(write_backs.len());
    for (param, value) in write_backs {
        if let (Some(Arg::Array(target)), Some(data)) = (args.get(param), results.get(&value)) {
            if data.len() != target.buffer().len() {
                return Err(FuseError::Backend(format!(
                    "kernel produced {} elements for argument {param} of {} elements",
                    data.len(),
                    target.buffer().len()
                )));
            }
            commits.push((target, data));
        }
    }
    // Every kernel has read its inputs; only now are arguments updated.
    for (target, data) in commits {
        target.buffer().overwrite(data);
    }

    let mut built: FxHashMap<ValueId, Operand> = FxHashMap::default();
    let mut outputs = Vec::with_capacity(graph.outputs.len());
    for slot in &graph.outputs {
        let operand = match *slot {
            OutputSlot::Param(i) => to_operand(&args[i])?,
            OutputSlot::Value(v) => match built.get(&v) {
                Some(op) => op.clone(),
                None => {
                    let op = build_output(graph, v, &shapes, &mut results, args)?;
                    built.insert(v, op.clone());
                    op
                }
            },
        };
        outputs.push(operand);
    }
    Ok(Returned::from_parts(graph.arity, outputs))
}

fn build_output(
    graph: &FusionGraph,
    value: ValueId,
    shapes: &[Shape],
    results: &mut FxHashMap<ValueId, Vec<Elem>>,
    args: &[Arg],
) -> FuseResult<Operand> {
    let info = graph.value(value);
    match info.def {
        ValueDef::Param(i) => return to_operand(&args[i]),
        ValueDef::Constant(s) => return Ok(Operand::Scalar(s)),
        ValueDef::Output { .. } => {}
    }
    let data = results
        .remove(&value)
        .ok_or_else(|| FuseError::Backend(format!("no kernel computed {value}")))?;
    Ok(match info.kind {
        ArgKind::Scalar => {
            let elem = data.first().copied().unwrap_or(Elem::zero(info.dtype));
            Operand::Scalar(Scalar::new(info.dtype, elem))
        }
        _ => Operand::Array(Array::from_buffer(
            Buffer::from_elems_unchecked(data, info.dtype),
            shapes[value.0].clone(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::module::{required, ArrayModule};
    use crate::trace::cache::FunctionId;
    use crate::DType;

    struct AddInPlace;

    impl FusedBody for AddInPlace {
        fn name(&self) -> &str {
            "add_in_place"
        }

        fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
            let x = required(args, 0)?;
            let y = required(args, 1)?;
            let x = xp.iadd(&x, &y)?;
            let z = xp.multiply(&x, &y)?;
            Ok(Returned::Tuple(vec![x, z.clone(), z]))
        }
    }

    fn compile(args: &[Arg]) -> CompiledBundle {
        let sig = Signature::of(FunctionId(0), "host", args);
        trace_and_compile(&AddInPlace, &sig, "add_in_place", &HostBackend).unwrap()
    }

    #[test]
    fn test_launch_writes_back_and_aliases() {
        let x = Array::from_vec_f64(vec![1.0, 2.0], Shape::from([2]));
        let args = [Arg::from(&x), Arg::from(10.0f64)];
        let bundle = compile(&args);
        assert_eq!(bundle.kernel_names(), vec!["add_in_place"]);
        let out = launch(&bundle, &args).unwrap().into_vec();
        assert_eq!(x.to_vec_f64(), vec![11.0, 12.0]);
        assert!(out[0].as_array().unwrap().shares_buffer(&x));
        assert_eq!(out[1].to_vec_f64(), vec![110.0, 120.0]);
        assert!(out[1].as_array().unwrap().shares_buffer(out[2].as_array().unwrap()));
    }

    #[test]
    fn test_data_race_detected() {
        let x = Array::from_vec_f64(vec![1.0, 2.0], Shape::from([2]));
        let args = [Arg::from(&x), Arg::from(&x)];
        let bundle = compile(&args);
        assert_eq!(bundle.hazards, vec![(0, 1)]);
        let err = launch(&bundle, &args).unwrap_err();
        assert!(matches!(err, FuseError::DataRace(_)));
        assert_eq!(x.to_vec_f64(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_alias_read_inside_the_write_is_allowed() {
        struct Accumulate;

        impl FusedBody for Accumulate {
            fn name(&self) -> &str {
                "accumulate"
            }

            fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
                let x = required(args, 0)?;
                let y = required(args, 1)?;
                Ok(Returned::Single(xp.iadd(&x, &y)?))
            }
        }

        let x = Array::from_vec_i64(vec![1, 2, 3], Shape::from([3]));
        let args = [Arg::from(&x), Arg::from(&x)];
        let sig = Signature::of(FunctionId(1), "host", &args);
        let bundle = trace_and_compile(&Accumulate, &sig, "accumulate", &HostBackend).unwrap();
        assert!(bundle.hazards.is_empty());
        let out = launch(&bundle, &args).unwrap().single().unwrap();
        assert_eq!(x.to_vec_i64(), vec![2, 4, 6]);
        assert!(out.as_array().unwrap().shares_buffer(&x));
    }

    #[test]
    fn test_static_error_waits_for_earlier_shapes() {
        struct AddThenAnd;

        impl FusedBody for AddThenAnd {
            fn name(&self) -> &str {
                "add_then_and"
            }

            fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
                let x = required(args, 0)?;
                let y = required(args, 1)?;
                let a = xp.add(&x, &y)?;
                let b = xp.bitwise_and(&x, &xp.constant(1i64))?;
                Ok(Returned::Tuple(vec![a, b]))
            }
        }

        let x = Array::zeros(Shape::from([3]), DType::Float64);
        let y = Array::zeros(Shape::from([2]), DType::Float64);
        let args = [Arg::from(&x), Arg::from(&y)];
        let sig = Signature::of(FunctionId(2), "host", &args);
        let bundle = trace_and_compile(&AddThenAnd, &sig, "add_then_and", &HostBackend).unwrap();
        assert!(bundle.kernels.is_empty());
        assert_eq!(bundle.graph.nodes.len(), 1);

        let err = launch(&bundle, &args).unwrap_err();
        assert_eq!(
            err.to_string(),
            "operands could not be broadcast together with shapes (3,) (2,)"
        );
        let y = Array::zeros(Shape::from([3]), DType::Float64);
        let err = launch(&bundle, &[Arg::from(&x), Arg::from(&y)]).unwrap_err();
        assert_eq!(err, FuseError::no_loop("bitwise_and"));
    }

    #[test]
    fn test_short_kernel_output_is_rejected() {
        #[derive(Debug)]
        struct Short(Arc<dyn CompiledKernel>);

        impl CompiledKernel for Short {
            fn spec(&self) -> &KernelSpec {
                self.0.spec()
            }

            fn launch(&self, args: &LaunchArgs<'_>) -> FuseResult<Vec<Vec<Elem>>> {
                let mut outputs = self.0.launch(args)?;
                for out in &mut outputs {
                    out.pop();
                }
                Ok(outputs)
            }
        }

        let x = Array::from_vec_f64(vec![1.0, 2.0], Shape::from([2]));
        let args = [Arg::from(&x), Arg::from(10.0f64)];
        let bundle = compile(&args);
        let bundle = CompiledBundle {
            kernels: bundle
                .kernels
                .into_iter()
                .map(|k| Arc::new(Short(k)) as Arc<dyn CompiledKernel>)
                .collect(),
            ..bundle
        };
        assert!(matches!(launch(&bundle, &args), Err(FuseError::Backend(_))));
        assert_eq!(x.to_vec_f64(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_shape_error_leaves_arguments_untouched() {
        let x = Array::from_vec_f64(vec![1.0, 2.0], Shape::from([2]));
        let y = Array::zeros(Shape::from([3]), DType::Float64);
        let args = [Arg::from(&x), Arg::from(&y)];
        let bundle = compile(&args);
        assert!(matches!(launch(&bundle, &args), Err(FuseError::Shape(_))));
        assert_eq!(x.to_vec_f64(), vec![1.0, 2.0]);
    }
}
