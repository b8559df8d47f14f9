//! Array operations: the ufunc catalogue, per-element math, reductions and
//! the eager evaluator built on them.

pub mod eager;
pub mod math;
pub mod reduce;
pub mod ufunc;
