//! Kernel specifications and generated source.
//!
//! Each fusion [`Stage`] becomes a [`KernelSpec`]: the parameters it reads,
//! where each of its results goes, and CUDA-style source text for the
//! kernel. Backends compile from the spec; the source is what a device
//! compiler would be handed and is logged when `FUSE_RS_DUMP_SOURCE` is set.

use crate::env;
use crate::module::ArgKind;
use crate::ops::reduce::ReduceOp;
use crate::scalar::Elem;
use crate::shape::Region;
use crate::trace::fusion::{Stage, StageKind};
use crate::trace::ir::{FusionGraph, NodeId, Op, ValueDef, ValueId};
use crate::DType;
use std::sync::Arc;
use tracing::debug;

/// Destination of a kernel result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDest {
    /// A newly allocated array or scalar.
    Fresh,
    /// Written back into the array bound to this parameter.
    InPlace(usize),
}

/// One result of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Graph value computed.
    pub value: ValueId,
    /// Its dtype.
    pub dtype: DType,
    /// Where it goes.
    pub dest: OutputDest,
}

/// Everything a backend needs to build one kernel.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    /// Kernel name.
    pub name: String,
    /// The stage this kernel computes.
    pub stage: Stage,
    /// The traced graph the stage refers into.
    pub graph: Arc<FusionGraph>,
    /// Parameters read by the kernel, by position.
    pub params: Vec<usize>,
    /// Results, in stage root order.
    pub outputs: Vec<OutputSpec>,
    /// Generated source.
    pub source: String,
}

impl KernelSpec {
    /// Builds the spec of `stage`.
    pub fn new(name: impl Into<String>, stage: Stage, graph: Arc<FusionGraph>) -> Self {
        let name = name.into();
        let params = params_read(&graph, &stage);
        let outputs = stage
            .roots
            .iter()
            .map(|&value| OutputSpec {
                value,
                dtype: graph.value(value).dtype,
                dest: graph
                    .write_back_of(value)
                    .map_or(OutputDest::Fresh, OutputDest::InPlace),
            })
            .collect();
        let source = Emitter::new(&graph, &stage).emit(&name, &params);
        if env::dump_source_enabled() {
            debug!(kernel = %name, "generated source:\n{source}");
        }
        Self {
            name,
            stage,
            graph,
            params,
            outputs,
            source,
        }
    }

    /// Returns true for reduction kernels.
    pub fn is_reduction(&self) -> bool {
        matches!(self.stage.kind, StageKind::Reduction { .. })
    }
}

fn stage_nodes(stage: &Stage) -> impl Iterator<Item = NodeId> + '_ {
    let reduce = match stage.kind {
        StageKind::Reduction { node, .. } => Some(node),
        StageKind::Elementwise => None,
    };
    stage
        .premap
        .iter()
        .copied()
        .chain(reduce)
        .chain(stage.postmap.iter().copied())
}

fn params_read(graph: &FusionGraph, stage: &Stage) -> Vec<usize> {
    let mut params: Vec<usize> = stage_nodes(stage)
        .flat_map(|n| graph.node(n).reads().collect::<Vec<_>>())
        .chain(stage.roots.iter().copied())
        .filter_map(|v| match graph.value(v).def {
            ValueDef::Param(i) => Some(i),
            _ => None,
        })
        .collect();
    params.sort_unstable();
    params.dedup();
    params
}

fn literal(value: Elem) -> String {
    match value {
        Elem::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn identity_literal(op: ReduceOp, dtype: DType) -> String {
    match op.identity(dtype) {
        Some(e) => format!("({}){}", dtype.c_type(), literal(e)),
        None => "_first_element".to_string(),
    }
}

fn reduce_expr(op: ReduceOp) -> &'static str {
    match op {
        ReduceOp::Sum => "_acc + _x",
        ReduceOp::Prod => "_acc * _x",
        ReduceOp::Max => "_maximum(_acc, _x)",
        ReduceOp::Min => "_minimum(_acc, _x)",
        ReduceOp::All => "_acc && _x",
        ReduceOp::Any => "_acc || _x",
    }
}

struct Emitter<'a> {
    graph: &'a FusionGraph,
    stage: &'a Stage,
    body: String,
}

impl<'a> Emitter<'a> {
    fn new(graph: &'a FusionGraph, stage: &'a Stage) -> Self {
        Self {
            graph,
            stage,
            body: String::new(),
        }
    }

    fn ctype(&self, v: ValueId) -> &'static str {
        self.graph.value(v).dtype.c_type()
    }

    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.body.push_str("  ");
        }
        self.body.push_str(text);
        self.body.push('\n');
    }

    /// Loads parameters and constants read by `nodes`.
    fn loads(&mut self, indent: usize, nodes: &[NodeId]) {
        let graph = self.graph;
        let mut reads: Vec<ValueId> = nodes
            .iter()
            .flat_map(|&n| graph.node(n).reads().collect::<Vec<_>>())
            .filter(|&v| graph.producer(v).is_none())
            .collect();
        reads.sort_unstable();
        reads.dedup();
        for v in reads {
            let info = graph.value(v);
            let ty = info.dtype.c_type();
            let text = match &info.def {
                ValueDef::Param(i) if info.kind == ArgKind::Array => {
                    format!("const {ty} {v} = in{i}[_ind.get()];")
                }
                ValueDef::Param(i) => format!("const {ty} {v} = in{i};"),
                ValueDef::Constant(s) => format!("const {ty} {v} = ({ty}){};", literal(s.elem())),
                ValueDef::Output { .. } => continue,
            };
            self.line(indent, &text);
        }
    }

    fn node(&mut self, indent: usize, id: NodeId) {
        let graph = self.graph;
        let node = graph.node(id);
        let cast = |v: ValueId, ty: &str| format!("({ty}){v}");
        match &node.op {
            Op::Ufunc { ufunc, lp } => {
                let mut expr = ufunc.c_template().to_string();
                for (k, (&v, dtype)) in node.inputs.iter().zip(&lp.inputs).enumerate() {
                    expr = expr.replace(&format!("${k}"), &cast(v, dtype.c_type()));
                }
                let out = node.outputs[0];
                if let Some(&second) = node.outputs.get(1) {
                    self.line(indent, &format!("{} {second};", self.ctype(second)));
                    expr = expr.replace("$o1", &second.to_string());
                }
                self.line(indent, &format!("{} {out} = {expr};", self.ctype(out)));
            }
            Op::Cast(dtype) => {
                let out = node.outputs[0];
                let text = format!("{} {out} = {};", dtype.c_type(), cast(node.inputs[0], dtype.c_type()));
                self.line(indent, &text);
            }
            Op::Assign(region) => {
                let out = node.outputs[0];
                let ty = self.ctype(out);
                let src = cast(node.inputs[0], ty);
                let text = match region {
                    Region::Full => format!("{ty} {out} = {src};"),
                    Region::Rows { start, stop } => format!(
                        "{ty} {out} = (_ind.row() >= {start} && _ind.row() < {stop}) ? {src} : {};",
                        node.targets[0]
                    ),
                };
                self.line(indent, &text);
            }
            Op::Reduce { .. } => {}
        }
    }

    fn stores(&mut self, indent: usize) {
        for (k, &root) in self.stage.roots.iter().enumerate() {
            let dest = match self.graph.write_back_of(root) {
                Some(i) => format!("in{i}"),
                None => format!("out{k}"),
            };
            self.line(indent, &format!("{dest}[_ind.get()] = {root};"));
        }
    }

    fn signature(&self, name: &str, params: &[usize]) -> String {
        let mut args: Vec<String> = params
            .iter()
            .map(|&i| {
                let p = &self.graph.params[i];
                let ty = p.dtype.map_or("void", DType::c_type);
                match p.kind {
                    ArgKind::Array => format!("{ty}* in{i}"),
                    _ => format!("const {ty} in{i}"),
                }
            })
            .collect();
        for (k, &root) in self.stage.roots.iter().enumerate() {
            if self.graph.write_back_of(root).is_none() {
                args.push(format!("{}* out{k}", self.ctype(root)));
            }
        }
        args.push("CIndexer _ind".to_string());
        format!("extern \"C\" __global__ void {name}({})", args.join(", "))
    }

    fn emit(mut self, name: &str, params: &[usize]) -> String {
        let header = self.signature(name, params);
        self.line(0, &format!("{header} {{"));
        match self.stage.kind {
            StageKind::Elementwise => {
                let nodes = self.stage.premap.clone();
                self.line(1, "FUSE_FOR(i, _ind.size()) {");
                self.line(2, "_ind.set(i);");
                self.loads(2, &nodes);
                for n in nodes {
                    self.node(2, n);
                }
                self.stores(2);
                self.line(1, "}");
            }
            StageKind::Reduction { node, op, .. } => {
                let graph = self.graph;
                let reduce = graph.node(node);
                let (input, result) = (reduce.inputs[0], reduce.outputs[0]);
                let ty = self.ctype(result);
                self.line(1, &format!("{ty} _acc = {};", identity_literal(op, graph.value(result).dtype)));
                self.line(1, "FUSE_FOR(i, _in_ind.size()) {");
                self.line(2, "_in_ind.set(i);");
                let premap = self.stage.premap.clone();
                self.loads(2, &premap);
                for n in premap {
                    self.node(2, n);
                }
                self.line(2, &format!("{ty} _x = ({ty}){input};"));
                self.line(2, &format!("_acc = {};", reduce_expr(op)));
                self.line(1, "}");
                self.line(1, "_REDUCE_SYNC(_acc);");
                self.line(1, &format!("{ty} {result} = _acc;"));
                let postmap = self.stage.postmap.clone();
                self.loads(1, &postmap);
                for n in postmap {
                    self.node(1, n);
                }
                self.stores(1);
            }
        }
        self.line(0, "}");
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ArrayModule, Returned};
    use crate::trace::fusion::partition;
    use crate::trace::tracer::Tracer;

    fn spec_of(build: impl FnOnce(&Tracer) -> Returned<crate::trace::tracer::TraceValue>) -> Vec<KernelSpec> {
        let t = Tracer::new("host");
        let returned = build(&t);
        let graph = Arc::new(t.finish("my_kernel".into(), returned));
        partition(&graph)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, stage)| {
                let name = if i == 0 { "my_kernel".to_string() } else { format!("my_kernel_{i}") };
                KernelSpec::new(name, stage, graph.clone())
            })
            .collect()
    }

    #[test]
    fn test_elementwise_source() {
        let specs = spec_of(|t| {
            let x = t.param(ArgKind::Array, Some(DType::Float32), 1).unwrap();
            let y = t.param(ArgKind::Scalar, Some(DType::Int64), 0).unwrap();
            Returned::Single(t.multiply(&x, &y).unwrap())
        });
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.params, vec![0, 1]);
        assert_eq!(spec.outputs[0].dest, OutputDest::Fresh);
        assert_eq!(spec.outputs[0].dtype, DType::Float32);
        assert!(spec.source.starts_with("extern \"C\" __global__ void my_kernel("));
        assert!(spec.source.contains("float* in0"));
        assert!(spec.source.contains("const long long in1"));
        assert!(spec.source.contains("(float)v0 * (float)v1"));
    }

    #[test]
    fn test_inplace_and_reduction_kernels() {
        let specs = spec_of(|t| {
            let x = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
            let y = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
            let s = t.sum(&x, None).unwrap();
            t.iadd(&y, &x).unwrap();
            Returned::Single(s)
        });
        assert_eq!(specs.len(), 2);
        assert!(specs[0].is_reduction());
        assert!(specs[0].source.contains("_REDUCE_SYNC"));
        assert_eq!(specs[1].name, "my_kernel_1");
        assert_eq!(specs[1].outputs[0].dest, OutputDest::InPlace(1));
        assert!(specs[1].source.contains("in1[_ind.get()] = "));
    }
}
