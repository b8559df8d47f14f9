//! Host backend: runs fused kernels on the CPU.
//!
//! Kernels are interpreted directly from the traced graph. Each output
//! element is computed by walking its expression tree at one index of the
//! iteration space, the way a device thread would evaluate the generated
//! source. Values are memoized per iteration point, so an expression shared
//! by several roots is evaluated once per element.

use crate::backend::{CompiledKernel, KernelBackend, LaunchArgs};
use crate::error::{FuseError, FuseResult};
use crate::ops::math;
use crate::ops::reduce::{Accumulator, ReduceOp};
use crate::scalar::Elem;
use crate::shape::Region;
use crate::trace::codegen::KernelSpec;
use crate::trace::fusion::StageKind;
use crate::trace::ir::{FusionGraph, NodeId, Op, ValueDef, ValueId};
use crate::Shape;
use std::sync::Arc;
use tracing::{debug, trace};

/// The CPU backend.
///
/// # Examples
///
/// ```
/// use fuse_rs::{HostBackend, KernelBackend};
///
/// assert_eq!(HostBackend::new().name(), "host");
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct HostBackend;

impl HostBackend {
    /// Create the host backend.
    pub fn new() -> Self {
        Self
    }
}

impl KernelBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn compile(&self, spec: &KernelSpec) -> FuseResult<Arc<dyn CompiledKernel>> {
        if let StageKind::Reduction { node, .. } = spec.stage.kind {
            if !spec.graph.node(node).is_reduction() {
                return Err(FuseError::Backend(format!(
                    "kernel '{}': node {node} is not a reduction",
                    spec.name
                )));
            }
        }
        debug!(
            kernel = %spec.name,
            nodes = spec.stage.premap.len() + spec.stage.postmap.len(),
            outputs = spec.outputs.len(),
            "compiled host kernel"
        );
        Ok(Arc::new(HostKernel { spec: spec.clone() }))
    }
}

#[derive(Debug)]
struct HostKernel {
    spec: KernelSpec,
}

impl CompiledKernel for HostKernel {
    fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    fn launch(&self, args: &LaunchArgs<'_>) -> FuseResult<Vec<Vec<Elem>>> {
        trace!(kernel = %self.spec.name, "launching host kernel");
        let mut eval = Evaluator::new(&self.spec.graph, args.inputs, args.shapes);
        if let StageKind::Reduction { node, op, axis } = self.spec.stage.kind {
            eval.reduce(node, op, axis)?;
        }
        eval.map(&self.spec.stage.roots)
    }
}

#[derive(Debug, Clone, Copy)]
struct Memo {
    epoch: u64,
    flat: usize,
    value: Elem,
}

struct Evaluator<'a> {
    graph: &'a FusionGraph,
    inputs: &'a [Vec<Elem>],
    shapes: &'a [Shape],
    reduced: Option<(ValueId, Vec<Elem>)>,
    memo: Vec<Option<Memo>>,
    epoch: u64,
}

impl<'a> Evaluator<'a> {
    fn new(graph: &'a FusionGraph, inputs: &'a [Vec<Elem>], shapes: &'a [Shape]) -> Self {
        Self {
            graph,
            inputs,
            shapes,
            reduced: None,
            memo: vec![None; graph.values.len()],
            epoch: 0,
        }
    }

    fn remember(&mut self, value: ValueId, flat: usize, elem: Elem) {
        self.memo[value.0] = Some(Memo {
            epoch: self.epoch,
            flat,
            value: elem,
        });
    }

    fn input(&self, param: usize, flat: usize) -> FuseResult<Elem> {
        self.inputs
            .get(param)
            .and_then(|data| data.get(flat))
            .copied()
            .ok_or_else(|| FuseError::Backend(format!("argument {param} has no element {flat}")))
    }

    /// Value of `value` at `index`, an index of any shape it broadcasts into.
    fn eval(&mut self, value: ValueId, index: &[usize]) -> FuseResult<Elem> {
        let shapes = self.shapes;
        let shape = &shapes[value.0];
        let flat = shape.unbroadcast_offset(index);
        if let Some(m) = self.memo[value.0] {
            if m.epoch == self.epoch && m.flat == flat {
                return Ok(m.value);
            }
        }
        let result = match self.graph.value(value).def {
            ValueDef::Param(i) => self.input(i, flat)?,
            ValueDef::Constant(s) => s.elem(),
            ValueDef::Output { node, index: k } => match &self.reduced {
                Some((r, data)) if *r == value => data[flat],
                _ => {
                    let mut own = Vec::with_capacity(shape.ndim());
                    shape.unbroadcast_into(index, &mut own);
                    self.eval_node(node, k, &own, flat)?
                }
            },
        };
        self.remember(value, flat, result);
        Ok(result)
    }

    fn eval_node(&mut self, id: NodeId, k: usize, own: &[usize], flat: usize) -> FuseResult<Elem> {
        let graph = self.graph;
        let node = graph.node(id);
        match &node.op {
            Op::Ufunc { ufunc, lp } => {
                let mut args = Vec::with_capacity(node.inputs.len());
                for (&v, &dtype) in node.inputs.iter().zip(&lp.inputs) {
                    args.push(self.eval(v, own)?.cast(dtype));
                }
                let results = math::apply(*ufunc, lp, &args);
                for (&out, &elem) in node.outputs.iter().zip(&results) {
                    self.remember(out, flat, elem.cast(graph.value(out).dtype));
                }
                Ok(results[k].cast(graph.value(node.outputs[k]).dtype))
            }
            Op::Cast(dtype) => Ok(self.eval(node.inputs[0], own)?.cast(*dtype)),
            Op::Assign(region) => {
                let (src, target) = (node.inputs[0], node.targets[0]);
                let dtype = graph.value(target).dtype;
                let written = match region {
                    Region::Full => Some(own.to_vec()),
                    Region::Rows { .. } => {
                        let (start, stop) = region.rows(&self.shapes[target.0]);
                        let row = own.first().copied().unwrap_or(0);
                        (start..stop).contains(&row).then(|| {
                            let mut shifted = own.to_vec();
                            shifted[0] = row - start;
                            shifted
                        })
                    }
                };
                match written {
                    Some(index) => Ok(self.eval(src, &index)?.cast(dtype)),
                    None => self.eval(target, own),
                }
            }
            Op::Reduce { .. } => Err(FuseError::Backend(format!(
                "reduction {id} evaluated outside its kernel"
            ))),
        }
    }

    /// Runs the reduction of `node` over its input's iteration space.
    fn reduce(&mut self, node: NodeId, op: ReduceOp, axis: Option<usize>) -> FuseResult<()> {
        let graph = self.graph;
        let shapes = self.shapes;
        let n = graph.node(node);
        let (input, output) = (n.inputs[0], n.outputs[0]);
        let in_shape = &shapes[input.0];
        let dtype = graph.value(output).dtype;
        let mut acc = Accumulator::new(op, dtype, shapes[output.0].size());
        let (len, inner) = match axis {
            Some(a) => {
                let dims = in_shape.as_slice();
                (dims[a], dims[a + 1..].iter().product::<usize>())
            }
            None => (1, 1),
        };
        let mut index = Vec::with_capacity(in_shape.ndim());
        for flat in 0..in_shape.size() {
            in_shape.unravel_into(flat, &mut index);
            self.epoch += 1;
            let value = self.eval(input, &index)?;
            let slot = match axis {
                Some(_) => (flat / (inner * len)) * inner + flat % inner,
                None => 0,
            };
            acc.push(slot, value);
        }
        self.reduced = Some((output, acc.finish()));
        Ok(())
    }

    /// Computes `roots` over their own shapes. Roots of equal shape share
    /// one pass.
    fn map(&mut self, roots: &[ValueId]) -> FuseResult<Vec<Vec<Elem>>> {
        let shapes = self.shapes;
        let mut groups: Vec<(&Shape, Vec<usize>)> = Vec::new();
        for (k, root) in roots.iter().enumerate() {
            let shape = &shapes[root.0];
            match groups.iter_mut().find(|(s, _)| *s == shape) {
                Some((_, members)) => members.push(k),
                None => groups.push((shape, vec![k])),
            }
        }

        let mut outputs: Vec<Vec<Elem>> = roots
            .iter()
            .map(|r| Vec::with_capacity(shapes[r.0].size()))
            .collect();
        let mut index = Vec::new();
        for (shape, members) in &groups {
            for flat in 0..shape.size() {
                shape.unravel_into(flat, &mut index);
                self.epoch += 1;
                for &k in members {
                    let value = self.eval(roots[k], &index)?;
                    outputs[k].push(value);
                }
            }
        }
        Ok(outputs)
    }
}
