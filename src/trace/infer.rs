//! Shape inference for traced graphs.
//!
//! Dtypes and ranks are fixed when a body is traced. Concrete shapes are
//! not part of the cache key, so they are resolved again on every call by
//! replaying the graph's nodes in program order. The replay covers every
//! recorded node, including ones the optimizer dropped, and applies the same
//! checks the eager evaluator does. A fused call therefore fails with the
//! error the unfused body would have raised first.

use crate::error::{FuseError, FuseResult};
use crate::ops::eager::check_out_shapes;
use crate::trace::ir::{FusionGraph, Op, ValueDef};
use crate::Shape;

/// Concrete shape of every value of `graph`, given the shapes of the call's
/// arguments (scalars and absent arguments are 0-d).
pub fn resolve_shapes(graph: &FusionGraph, params: &[Shape]) -> FuseResult<Vec<Shape>> {
    if params.len() != graph.params.len() {
        return Err(FuseError::Type(format!(
            "{}() takes {} positional arguments but {} were given",
            graph.name,
            graph.params.len(),
            params.len()
        )));
    }

    let mut shapes: Vec<Shape> = graph
        .values
        .iter()
        .map(|info| match info.def {
            ValueDef::Param(i) => params[i].clone(),
            _ => Shape::scalar(),
        })
        .collect();

    for node in &graph.nodes {
        let inputs: Vec<&Shape> = node.inputs.iter().map(|v| &shapes[v.0]).collect();
        let targets: Vec<&Shape> = node.targets.iter().map(|v| &shapes[v.0]).collect();
        let resolved: Vec<Shape> = match &node.op {
            Op::Ufunc { .. } if targets.is_empty() => {
                let shape = Shape::broadcast_all(&inputs)?;
                vec![shape; node.outputs.len()]
            }
            Op::Ufunc { .. } => {
                check_out_shapes(&inputs, &targets)?;
                targets.iter().map(|s| (*s).clone()).collect()
            }
            Op::Cast(_) => vec![inputs[0].clone()],
            Op::Reduce { op, axis } => vec![op.reduced_shape(inputs[0], *axis)?],
            Op::Assign(region) => {
                region.check_source(inputs[0], targets[0])?;
                vec![targets[0].clone()]
            }
        };
        for (out, shape) in node.outputs.iter().zip(resolved) {
            shapes[out.0] = shape;
        }
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ArgKind, ArrayModule, Returned};
    use crate::trace::tracer::Tracer;
    use crate::DType;

    #[test]
    fn test_broadcast_and_reduce() {
        let t = Tracer::new("host");
        let x = t.param(ArgKind::Array, Some(DType::Float64), 2).unwrap();
        let y = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
        let z = t.add(&x, &y).unwrap();
        let s = t.sum(&z, Some(0)).unwrap();
        let g = t.finish("f".into(), Returned::Tuple(vec![z, s]));
        let shapes = resolve_shapes(&g, &[Shape::from([4, 3]), Shape::from([3])]).unwrap();
        assert_eq!(shapes[g.nodes[0].outputs[0].0], Shape::from([4, 3]));
        assert_eq!(shapes[g.nodes[1].outputs[0].0], Shape::from([3]));

        let err = resolve_shapes(&g, &[Shape::from([4, 3]), Shape::from([2])]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "operands could not be broadcast together with shapes (4, 3) (2,)"
        );
    }

    #[test]
    fn test_dead_nodes_still_checked() {
        let t = Tracer::new("host");
        let x = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
        let y = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
        let _unused = t.add(&x, &y).unwrap();
        let g = t.finish("f".into(), Returned::Single(x));
        assert!(resolve_shapes(&g, &[Shape::from([3]), Shape::from([4])]).is_err());
    }

    #[test]
    fn test_inplace_target_must_match() {
        let t = Tracer::new("host");
        let x = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
        let y = t.param(ArgKind::Array, Some(DType::Float64), 2).unwrap();
        t.iadd(&x, &y).unwrap();
        let g = t.finish("f".into(), Returned::None);
        let err = resolve_shapes(&g, &[Shape::from([3]), Shape::from([2, 3])]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "non-broadcastable output operand with shape (3,) doesn't match the broadcast shape (2, 3)"
        );
        assert!(resolve_shapes(&g, &[Shape::from([3]), Shape::from([1, 3])]).is_err());
        assert!(resolve_shapes(&g, &[Shape::from([3]), Shape::from([1, 1])]).is_err());
    }

    #[test]
    fn test_wrong_argument_count() {
        let t = Tracer::new("host");
        let x = t.param(ArgKind::Array, Some(DType::Float64), 1).unwrap();
        let g = t.finish("f".into(), Returned::Single(x));
        assert!(resolve_shapes(&g, &[]).is_err());
    }
}
