//! Intermediate representation for traced fused bodies.
//!
//! A trace produces a [`FusionGraph`]: a list of [`Node`]s in program order
//! over SSA [`ValueId`]s. Values carry only what is known at trace time
//! (dtype, rank, array or scalar); concrete shapes are resolved per call.
//!
//! In-place updates never mutate a value. Writing into an array creates a
//! new value for it, and the node records the old one as its target.

use crate::module::{ArgKind, Arity};
use crate::ops::reduce::ReduceOp;
use crate::ops::ufunc::{Loop, Ufunc};
use crate::scalar::Scalar;
use crate::shape::Region;
use crate::DType;
use std::fmt;

/// Index of a value in a [`FusionGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub usize);

/// Index of a node in a [`FusionGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDef {
    /// Positional parameter.
    Param(usize),
    /// Literal constant.
    Constant(Scalar),
    /// Output `index` of a node.
    Output {
        /// Producing node.
        node: NodeId,
        /// Position among the node's outputs.
        index: usize,
    },
}

/// Trace-time description of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    /// Element dtype.
    pub dtype: DType,
    /// Rank.
    pub ndim: usize,
    /// Array or scalar.
    pub kind: ArgKind,
    /// Definition.
    pub def: ValueDef,
}

/// Primitive operations recorded by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    /// Elementwise ufunc with its resolved loop.
    Ufunc {
        /// The ufunc.
        ufunc: Ufunc,
        /// Resolved loop dtypes.
        lp: Loop,
    },
    /// Dtype conversion.
    Cast(DType),
    /// Reduction along an axis, or all axes.
    Reduce {
        /// Reduction operator.
        op: ReduceOp,
        /// Reduced axis; `None` reduces everything.
        axis: Option<usize>,
    },
    /// Slice assignment into the node's single target.
    Assign(Region),
}

impl Op {
    /// Short name for logs and generated code.
    pub fn name(&self) -> String {
        match self {
            Op::Ufunc { ufunc, .. } => ufunc.name().to_string(),
            Op::Cast(dtype) => format!("astype<{dtype}>"),
            Op::Reduce { op, .. } => op.name().to_string(),
            Op::Assign(_) => "setitem".to_string(),
        }
    }
}

/// A recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Operation.
    pub op: Op,
    /// Operand values.
    pub inputs: Vec<ValueId>,
    /// Values before an in-place write, one per written array.
    pub targets: Vec<ValueId>,
    /// Values produced. For in-place writes, the new value of each target.
    pub outputs: Vec<ValueId>,
}

impl Node {
    /// Returns true for reductions.
    pub fn is_reduction(&self) -> bool {
        matches!(self.op, Op::Reduce { .. })
    }

    /// Values whose elements this node reads.
    ///
    /// A partial slice assignment keeps the untouched rows of its target;
    /// every other write replaces its target entirely.
    pub fn reads(&self) -> impl Iterator<Item = ValueId> + '_ {
        let keeps_target = matches!(self.op, Op::Assign(Region::Rows { .. }));
        let targets: &[ValueId] = if keeps_target { &self.targets } else { &[] };
        self.inputs.iter().chain(targets).copied()
    }
}

/// A positional parameter of the traced function.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Kind of the argument.
    pub kind: ArgKind,
    /// Dtype, absent for the absent sentinel.
    pub dtype: Option<DType>,
    /// Rank.
    pub ndim: usize,
    /// Initial value; `None` for absent arguments.
    pub value: Option<ValueId>,
}

/// Where a returned value is taken from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputSlot {
    /// The caller's own argument.
    Param(usize),
    /// A value of the graph.
    Value(ValueId),
}

/// A traced fused function.
#[derive(Debug, Clone)]
pub struct FusionGraph {
    /// Kernel name.
    pub name: String,
    /// Every value, indexed by [`ValueId`].
    pub values: Vec<ValueInfo>,
    /// Nodes in program order.
    pub nodes: Vec<Node>,
    /// Parameters in positional order.
    pub params: Vec<Param>,
    /// Returned values in order.
    pub outputs: Vec<OutputSlot>,
    /// Return arity of the body.
    pub arity: Arity,
    /// Final values of array parameters written in place.
    pub write_backs: Vec<(usize, ValueId)>,
}

impl FusionGraph {
    /// Info of a value.
    #[inline]
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0]
    }

    /// A node.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Node producing `value`, if any.
    pub fn producer(&self, value: ValueId) -> Option<NodeId> {
        match self.value(value).def {
            ValueDef::Output { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Values that must be computed by a kernel: returned node outputs and
    /// write-backs, without duplicates.
    pub fn roots(&self) -> Vec<ValueId> {
        let returned = self.outputs.iter().filter_map(|slot| match slot {
            OutputSlot::Value(v) => Some(*v),
            OutputSlot::Param(_) => None,
        });
        let written = self.write_backs.iter().map(|&(_, v)| v);
        let mut roots: Vec<ValueId> = Vec::new();
        for v in returned.chain(written) {
            if self.producer(v).is_some() && !roots.contains(&v) {
                roots.push(v);
            }
        }
        roots
    }

    /// Parameter whose storage each value lives in: the parameter's own
    /// value and every in-place update of it. Indexed by [`ValueId`].
    pub fn param_owners(&self) -> Vec<Option<usize>> {
        let mut owners = vec![None; self.values.len()];
        for (i, param) in self.params.iter().enumerate() {
            if let Some(v) = param.value {
                owners[v.0] = Some(i);
            }
        }
        for node in &self.nodes {
            for (target, out) in node.targets.iter().zip(&node.outputs) {
                owners[out.0] = owners[target.0];
            }
        }
        owners
    }

    /// Parameter written back by `value`, if it is a write-back.
    pub fn write_back_of(&self, value: ValueId) -> Option<usize> {
        self.write_backs
            .iter()
            .find(|&&(_, v)| v == value)
            .map(|&(param, _)| param)
    }
}

/// Incremental construction of a [`FusionGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    values: Vec<ValueInfo>,
    nodes: Vec<Node>,
    params: Vec<Param>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, dtype: DType, ndim: usize, kind: ArgKind, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(ValueInfo {
            dtype,
            ndim,
            kind,
            def,
        });
        id
    }

    /// Registers the next positional parameter.
    pub fn param(&mut self, kind: ArgKind, dtype: Option<DType>, ndim: usize) -> Option<ValueId> {
        let index = self.params.len();
        let value = match (kind, dtype) {
            (ArgKind::Absent, _) | (_, None) => None,
            (kind, Some(dtype)) => Some(self.push_value(dtype, ndim, kind, ValueDef::Param(index))),
        };
        self.params.push(Param {
            kind,
            dtype,
            ndim,
            value,
        });
        value
    }

    /// Registers a literal constant.
    pub fn constant(&mut self, value: Scalar) -> ValueId {
        self.push_value(value.dtype(), 0, ArgKind::Scalar, ValueDef::Constant(value))
    }

    /// Appends a node and returns its output values.
    ///
    /// `outputs` gives dtype, rank and kind of each produced value.
    pub fn push_node(
        &mut self,
        op: Op,
        inputs: Vec<ValueId>,
        targets: Vec<ValueId>,
        outputs: &[(DType, usize, ArgKind)],
    ) -> Vec<ValueId> {
        let node = NodeId(self.nodes.len());
        let ids: Vec<ValueId> = outputs
            .iter()
            .enumerate()
            .map(|(index, &(dtype, ndim, kind))| {
                self.push_value(dtype, ndim, kind, ValueDef::Output { node, index })
            })
            .collect();
        self.nodes.push(Node {
            op,
            inputs,
            targets,
            outputs: ids.clone(),
        });
        ids
    }

    /// Info of a value recorded so far.
    pub fn value(&self, id: ValueId) -> &ValueInfo {
        &self.values[id.0]
    }

    /// Parameters recorded so far.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Finishes the graph.
    pub fn finish(
        self,
        name: String,
        outputs: Vec<OutputSlot>,
        arity: Arity,
        write_backs: Vec<(usize, ValueId)>,
    ) -> FusionGraph {
        FusionGraph {
            name,
            values: self.values,
            nodes: self.nodes,
            params: self.params,
            outputs,
            arity,
            write_backs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_loop(d: DType) -> Op {
        Op::Ufunc {
            ufunc: Ufunc::Add,
            lp: Loop {
                inputs: vec![d, d],
                outputs: vec![d],
            },
        }
    }

    #[test]
    fn test_builder() {
        let mut b = GraphBuilder::new();
        let x = b.param(ArgKind::Array, Some(DType::Float32), 2).unwrap();
        assert!(b.param(ArgKind::Absent, None, 0).is_none());
        let c = b.constant(Scalar::from(1.0f32));
        let out = b.push_node(
            add_loop(DType::Float32),
            vec![x, c],
            vec![],
            &[(DType::Float32, 2, ArgKind::Array)],
        );
        let g = b.finish("f".into(), vec![OutputSlot::Value(out[0])], Arity::Single, vec![]);
        assert_eq!(g.params.len(), 2);
        assert_eq!(g.value(x).def, ValueDef::Param(0));
        assert_eq!(g.producer(out[0]), Some(NodeId(0)));
        assert_eq!(g.producer(c), None);
        assert_eq!(g.roots(), vec![out[0]]);
        assert_eq!(g.node(NodeId(0)).op.name(), "add");
    }

    #[test]
    fn test_roots_dedupe_and_skip_params() {
        let mut b = GraphBuilder::new();
        let x = b.param(ArgKind::Array, Some(DType::Int64), 1).unwrap();
        let y = b.push_node(
            add_loop(DType::Int64),
            vec![x, x],
            vec![x],
            &[(DType::Int64, 1, ArgKind::Array)],
        )[0];
        let g = b.finish(
            "g".into(),
            vec![OutputSlot::Param(0), OutputSlot::Value(y), OutputSlot::Value(x)],
            Arity::Tuple(3),
            vec![(0, y)],
        );
        assert_eq!(g.roots(), vec![y]);
        assert_eq!(g.write_back_of(y), Some(0));
        assert_eq!(g.write_back_of(x), None);
        assert_eq!(g.param_owners(), vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_reads_of_partial_assignment() {
        let node = Node {
            op: Op::Assign(Region::Rows { start: 0, stop: 1 }),
            inputs: vec![ValueId(1)],
            targets: vec![ValueId(0)],
            outputs: vec![ValueId(2)],
        };
        assert_eq!(node.reads().collect::<Vec<_>>(), vec![ValueId(1), ValueId(0)]);
        let full = Node {
            op: Op::Assign(Region::Full),
            ..node
        };
        assert_eq!(full.reads().collect::<Vec<_>>(), vec![ValueId(1)]);
    }
}
