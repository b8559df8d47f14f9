//! Tracing, optimization and execution of fused functions.
//!
//! A fused call goes through these stages:
//!
//! 1. [`tracer`] runs the body against placeholders and records a
//!    [`FusionGraph`] in SSA form ([`ir`]). Types are checked here.
//! 2. [`fusion`] removes dead nodes and splits the graph into kernel stages
//!    around at most one reduction.
//! 3. [`codegen`] describes each stage as a [`KernelSpec`] and emits its
//!    source; a backend compiles it.
//! 4. [`cache`] keeps the compiled bundle per call signature.
//! 5. [`executor`] resolves shapes ([`infer`]) and launches the kernels on
//!    every call.

pub mod cache;
pub mod codegen;
pub mod executor;
pub mod fused;
pub mod fusion;
pub mod infer;
pub mod ir;
pub mod tracer;

pub use cache::{CacheStats, FunctionId, KernelCache, ParamKey, Signature};
pub use codegen::{KernelSpec, OutputDest, OutputSpec};
pub use executor::{launch, trace_and_compile, CompiledBundle};
pub use fused::{fuse, fuse_with, CompileHook, FuseOptions, Fused};
pub use fusion::{partition, partition_with_stats, FusionStats, Stage, StageKind};
pub use infer::resolve_shapes;
pub use ir::{FusionGraph, GraphBuilder, Node, NodeId, Op, OutputSlot, ValueDef, ValueId};
pub use tracer::{TraceValue, Tracer};
