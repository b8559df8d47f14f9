//! Backend implementations for compiling and launching fused kernels.
//!
//! A backend turns a [`KernelSpec`] into a [`CompiledKernel`] once per
//! signature, then launches it on every call with that signature. The
//! backend's [`name`](KernelBackend::name) is part of the cache key, so
//! kernels compiled for one backend are never launched on another.
//!
//! - Host: a reference evaluator running on the CPU.

pub mod host;

use crate::error::FuseResult;
use crate::scalar::Elem;
use crate::trace::codegen::KernelSpec;
use crate::Shape;
use std::fmt;
use std::sync::Arc;

pub use host::HostBackend;

/// Inputs of one kernel launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchArgs<'a> {
    /// Elements of every positional argument, in order. Scalars hold one
    /// element; absent arguments hold none.
    pub inputs: &'a [Vec<Elem>],
    /// Concrete shape of every graph value for this call.
    pub shapes: &'a [Shape],
}

/// A compiled kernel ready to launch.
pub trait CompiledKernel: Send + Sync + fmt::Debug {
    /// The spec the kernel was compiled from.
    fn spec(&self) -> &KernelSpec;

    /// Runs the kernel, returning the elements of each output of
    /// [`KernelSpec::outputs`], in order.
    fn launch(&self, args: &LaunchArgs<'_>) -> FuseResult<Vec<Vec<Elem>>>;
}

/// A kernel compiler.
pub trait KernelBackend: Send + Sync {
    /// Name of the backend; distinguishes cache entries.
    fn name(&self) -> &'static str;

    /// Compiles one kernel.
    fn compile(&self, spec: &KernelSpec) -> FuseResult<Arc<dyn CompiledKernel>>;
}

impl fmt::Debug for dyn KernelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KernelBackend({})", self.name())
    }
}
