//! Kernel fusion optimization pass.
//!
//! Splits a traced graph into kernel stages:
//!
//! 1. Nodes that contribute to no returned value and no write-back are
//!    dropped.
//! 2. Without a reduction, every remaining node runs in one elementwise
//!    kernel.
//! 3. With a reduction, the nodes feeding it form the pre-map, the reduction
//!    runs over the pre-map's iteration space, and nodes consuming its
//!    result form the post-map. Roots that do not depend on the reduction
//!    get a separate elementwise kernel.
//!
//! Intermediates are never materialized between stages; a node needed by
//! two stages is recomputed by both.

use crate::error::{FuseResult, TraceError};
use crate::module::ArgKind;
use crate::ops::reduce::ReduceOp;
use crate::trace::ir::{FusionGraph, NodeId, Op, ValueId};
use rustc_hash::FxHashSet;

/// What a stage computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// A map over the roots' shapes.
    Elementwise,
    /// A reduction followed by a map over its result.
    Reduction {
        /// The reduction node.
        node: NodeId,
        /// Reduction operator.
        op: ReduceOp,
        /// Reduced axis.
        axis: Option<usize>,
    },
}

/// One kernel of a fused function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Kind of kernel.
    pub kind: StageKind,
    /// Nodes computed before the reduction, in program order. For
    /// elementwise stages, every node of the stage.
    pub premap: Vec<NodeId>,
    /// Nodes computed from the reduction result, in program order.
    pub postmap: Vec<NodeId>,
    /// Values the stage writes out.
    pub roots: Vec<ValueId>,
}

/// Statistics about a partition, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionStats {
    /// Nodes recorded by the trace.
    pub traced_nodes: usize,
    /// Nodes kept after dead-code elimination.
    pub live_nodes: usize,
    /// Number of kernels.
    pub stages: usize,
}

impl FusionStats {
    /// Nodes removed as dead code.
    pub fn eliminated(&self) -> usize {
        self.traced_nodes - self.live_nodes
    }
}

/// Nodes needed to compute `roots`, in program order.
///
/// Traversal does not continue past nodes in `stop`.
fn closure(graph: &FusionGraph, roots: &[ValueId], stop: &FxHashSet<NodeId>) -> Vec<NodeId> {
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();
    let mut stack: Vec<ValueId> = roots.to_vec();
    while let Some(value) = stack.pop() {
        let Some(node) = graph.producer(value) else {
            continue;
        };
        if !seen.insert(node) || stop.contains(&node) {
            continue;
        }
        stack.extend(graph.node(node).reads());
    }
    let mut nodes: Vec<NodeId> = seen.into_iter().filter(|n| !stop.contains(n)).collect();
    nodes.sort_unstable();
    nodes
}

/// Returns true if computing `value` requires the output of `node`.
fn depends_on(graph: &FusionGraph, value: ValueId, node: NodeId) -> bool {
    let none = FxHashSet::default();
    graph.producer(value) == Some(node) || closure(graph, &[value], &none).contains(&node)
}

/// Nodes contributing to a returned value or a write-back, in program order.
pub fn live_nodes(graph: &FusionGraph) -> Vec<NodeId> {
    closure(graph, &graph.roots(), &FxHashSet::default())
}

/// Pairs `(written, other)` of array parameters that must not share storage.
///
/// Kernels read every argument as it was when the call began. That agrees
/// with running the body op by op unless `other` is written in place too,
/// or a live node after the first write to `written` reads `other`. The
/// writing node itself may read `other`: each element is read before it is
/// written.
pub fn alias_hazards(graph: &FusionGraph) -> Vec<(usize, usize)> {
    let owners = graph.param_owners();
    let live = live_nodes(graph);
    let written: Vec<usize> = graph.write_backs.iter().map(|&(p, _)| p).collect();
    let mut hazards = Vec::new();
    for &w in &written {
        let first_write = graph
            .nodes
            .iter()
            .position(|n| n.targets.iter().any(|t| owners[t.0] == Some(w)));
        for (other, param) in graph.params.iter().enumerate() {
            if other == w || param.kind != ArgKind::Array {
                continue;
            }
            let read_after = first_write.is_some_and(|first| {
                live.iter()
                    .filter(|n| n.0 > first)
                    .any(|&n| graph.node(n).reads().any(|v| owners[v.0] == Some(other)))
            });
            if written.contains(&other) || read_after {
                hazards.push((w, other));
            }
        }
    }
    hazards
}

/// Partitions `graph` into kernel stages.
pub fn partition(graph: &FusionGraph) -> FuseResult<Vec<Stage>> {
    Ok(partition_with_stats(graph)?.0)
}

/// Like [`partition`], also reporting what the pass did.
pub fn partition_with_stats(graph: &FusionGraph) -> FuseResult<(Vec<Stage>, FusionStats)> {
    let roots = graph.roots();
    let live = live_nodes(graph);

    let mut reductions = live.iter().filter_map(|&n| match graph.node(n).op {
        Op::Reduce { op, axis } => Some((n, op, axis)),
        _ => None,
    });
    let reduction = reductions.next();
    if let Some((_, second, _)) = reductions.next() {
        let first = reduction.map(|(_, op, _)| op.name()).unwrap_or_default();
        return Err(TraceError::MultipleReductions {
            first: first.to_string(),
            second: second.name().to_string(),
        }
        .into());
    }

    let mut stages = Vec::new();
    match reduction {
        None if roots.is_empty() => {}
        None => stages.push(Stage {
            kind: StageKind::Elementwise,
            premap: live.clone(),
            postmap: Vec::new(),
            roots: roots.clone(),
        }),
        Some((node, op, axis)) => {
            let (main, side): (Vec<ValueId>, Vec<ValueId>) =
                roots.iter().copied().partition(|&r| depends_on(graph, r, node));
            let none = FxHashSet::default();
            let stop: FxHashSet<NodeId> = std::iter::once(node).collect();
            stages.push(Stage {
                kind: StageKind::Reduction { node, op, axis },
                premap: closure(graph, &graph.node(node).inputs, &none),
                postmap: closure(graph, &main, &stop),
                roots: main,
            });
            if !side.is_empty() {
                stages.push(Stage {
                    kind: StageKind::Elementwise,
                    premap: closure(graph, &side, &none),
                    postmap: Vec::new(),
                    roots: side,
                });
            }
        }
    }

    let stats = FusionStats {
        traced_nodes: graph.nodes.len(),
        live_nodes: live.len(),
        stages: stages.len(),
    };
    Ok((stages, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FuseError;
    use crate::module::{ArgKind, ArrayModule, Returned};
    use crate::trace::tracer::Tracer;
    use crate::DType;

    fn tracer_with(n: usize) -> (Tracer, Vec<crate::trace::tracer::TraceValue>) {
        let t = Tracer::new("host");
        let params = (0..n)
            .map(|_| t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap())
            .collect();
        (t, params)
    }

    #[test]
    fn test_single_elementwise_stage() {
        let (t, p) = tracer_with(2);
        let a = t.add(&p[0], &p[1]).unwrap();
        let b = t.multiply(&a, &p[0]).unwrap();
        let _dead = t.sqrt(&p[1]).unwrap();
        let g = t.finish("f".into(), Returned::Single(b));
        let (stages, stats) = partition_with_stats(&g).unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].kind, StageKind::Elementwise);
        assert_eq!(stages[0].premap, vec![NodeId(0), NodeId(1)]);
        assert_eq!(stats.eliminated(), 1);
    }

    #[test]
    fn test_reduction_split() {
        let (t, p) = tracer_with(2);
        let sq = t.square(&p[0]).unwrap();
        let s = t.sum(&sq, None).unwrap();
        let r = t.sqrt(&s).unwrap();
        let side = t.add(&p[0], &p[1]).unwrap();
        let g = t.finish("f".into(), Returned::Tuple(vec![r, side]));
        let stages = partition(&g).unwrap();
        assert_eq!(stages.len(), 2);
        assert!(matches!(stages[0].kind, StageKind::Reduction { node: NodeId(1), .. }));
        assert_eq!(stages[0].premap, vec![NodeId(0)]);
        assert_eq!(stages[0].postmap, vec![NodeId(2)]);
        assert_eq!(stages[1].kind, StageKind::Elementwise);
        assert_eq!(stages[1].premap, vec![NodeId(3)]);
    }

    #[test]
    fn test_second_reduction_rejected() {
        let (t, p) = tracer_with(1);
        let a = t.sum(&p[0], None).unwrap();
        let b = t.amax(&p[0], None).unwrap();
        let c = t.add(&a, &b).unwrap();
        let g = t.finish("f".into(), Returned::Single(c));
        let err = partition(&g).unwrap_err();
        assert!(matches!(
            err,
            FuseError::Trace(TraceError::MultipleReductions { .. })
        ));
        assert!(err.is_trace());
    }

    #[test]
    fn test_dead_reduction_is_ignored() {
        let (t, p) = tracer_with(1);
        let _a = t.sum(&p[0], None).unwrap();
        let b = t.prod(&p[0], None).unwrap();
        let g = t.finish("f".into(), Returned::Single(b));
        let stages = partition(&g).unwrap();
        assert_eq!(stages.len(), 1);
    }

    #[test]
    fn test_alias_hazards() {
        // x += y; return x: reads of y happen inside the write.
        let (t, p) = tracer_with(2);
        t.iadd(&p[0], &p[1]).unwrap();
        let g = t.finish("f".into(), Returned::Single(p[0].clone()));
        assert!(alias_hazards(&g).is_empty());

        // x += y; return x * y: y is read after x changed.
        let (t, p) = tracer_with(2);
        t.iadd(&p[0], &p[1]).unwrap();
        let z = t.multiply(&p[0], &p[1]).unwrap();
        let g = t.finish("f".into(), Returned::Single(z));
        assert_eq!(alias_hazards(&g), vec![(0, 1)]);

        // A dead read after the write is never observed.
        let (t, p) = tracer_with(2);
        t.iadd(&p[0], &p[1]).unwrap();
        let _dead = t.multiply(&p[0], &p[1]).unwrap();
        let g = t.finish("f".into(), Returned::None);
        assert!(alias_hazards(&g).is_empty());

        // x += z; y += z: x and y are both written, and z is read after
        // x changed. Nothing reads x after y changed.
        let (t, p) = tracer_with(3);
        t.iadd(&p[0], &p[2]).unwrap();
        t.iadd(&p[1], &p[2]).unwrap();
        let g = t.finish("f".into(), Returned::None);
        assert_eq!(alias_hazards(&g), vec![(0, 1), (0, 2), (1, 0)]);
    }

    #[test]
    fn test_nothing_to_compute() {
        let (t, p) = tracer_with(1);
        let g = t.finish("f".into(), Returned::Single(p[0].clone()));
        assert!(partition(&g).unwrap().is_empty());
    }
}
