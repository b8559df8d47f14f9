//! Fused callables.
//!
//! [`fuse`] wraps a [`FusedBody`] into a [`Fused`] function. Calling it
//! looks up the compiled kernels for the call's signature, tracing and
//! compiling them on first use, then launches them.

use crate::backend::KernelBackend;
use crate::device;
use crate::env;
use crate::error::FuseResult;
use crate::module::{Arg, FusedBody, Operand, Returned};
use crate::ops::eager::Eager;
use crate::trace::cache::{CacheStats, FunctionId, KernelCache, Signature};
use crate::trace::executor::{launch, trace_and_compile};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Callback invoked after each successful compilation.
pub type CompileHook = Arc<dyn Fn(&Signature) + Send + Sync>;

/// Options of a fused function.
///
/// # Examples
///
/// ```
/// use fuse_rs::FuseOptions;
///
/// let options = FuseOptions::new().kernel_name("saxpy");
/// assert_eq!(options.get_kernel_name(), Some("saxpy"));
/// ```
#[derive(Clone, Default)]
pub struct FuseOptions {
    kernel_name: Option<String>,
    backend: Option<Arc<dyn KernelBackend>>,
    on_compile: Option<CompileHook>,
}

impl FuseOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the generated kernel; defaults to the body's name.
    pub fn kernel_name(mut self, name: impl Into<String>) -> Self {
        self.kernel_name = Some(name.into());
        self
    }

    /// Pins the backend instead of following [`current_backend`].
    ///
    /// [`current_backend`]: crate::current_backend
    pub fn backend(mut self, backend: Arc<dyn KernelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Registers a callback run after each compilation.
    pub fn on_compile<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Signature) + Send + Sync + 'static,
    {
        self.on_compile = Some(Arc::new(hook));
        self
    }

    /// The configured kernel name.
    pub fn get_kernel_name(&self) -> Option<&str> {
        self.kernel_name.as_deref()
    }
}

impl fmt::Debug for FuseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuseOptions")
            .field("kernel_name", &self.kernel_name)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("on_compile", &self.on_compile.is_some())
            .finish()
    }
}

/// A fused function.
///
/// Holds the body, its options and the per-signature kernel cache. A
/// `Fused` is `Sync` when its body is, and may be called from many threads
/// at once.
pub struct Fused<B> {
    body: B,
    id: FunctionId,
    options: FuseOptions,
    cache: KernelCache,
}

/// Wraps `body` into a fused function with default options.
///
/// # Examples
///
/// ```
/// use fuse_rs::{fuse, required, Arg, Array, ArrayModule, FuseResult, FusedBody, Returned, Shape};
///
/// struct Squares;
///
/// impl FusedBody for Squares {
///     fn name(&self) -> &str {
///         "squares"
///     }
///
///     fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
///         let x = required(args, 0)?;
///         Ok(Returned::Single(xp.square(&x)?))
///     }
/// }
///
/// let f = fuse(Squares);
/// let x = Array::from_vec_f64(vec![1.0, 2.0, 3.0], Shape::from([3]));
/// let y = f.call(&[Arg::from(&x)])?.single().unwrap();
/// assert_eq!(y.to_vec_f64(), vec![1.0, 4.0, 9.0]);
/// # Ok::<(), fuse_rs::FuseError>(())
/// ```
pub fn fuse<B: FusedBody>(body: B) -> Fused<B> {
    fuse_with(body, FuseOptions::default())
}

/// Wraps `body` into a fused function with `options`.
pub fn fuse_with<B: FusedBody>(body: B, options: FuseOptions) -> Fused<B> {
    Fused {
        body,
        id: FunctionId::next(),
        options,
        cache: KernelCache::new(),
    }
}

impl<B: FusedBody> Fused<B> {
    /// Name of the wrapped function.
    pub fn name(&self) -> &str {
        self.body.name()
    }

    /// Documentation of the wrapped function.
    pub fn doc(&self) -> Option<&str> {
        self.body.doc()
    }

    /// Name given to generated kernels.
    pub fn kernel_name(&self) -> &str {
        self.options
            .get_kernel_name()
            .unwrap_or_else(|| self.body.name())
    }

    /// The wrapped body.
    pub fn body(&self) -> &B {
        &self.body
    }

    /// Identity used in cache keys.
    pub fn id(&self) -> FunctionId {
        self.id
    }

    fn backend(&self) -> Arc<dyn KernelBackend> {
        self.options
            .backend
            .clone()
            .unwrap_or_else(device::current_backend)
    }

    /// Calls the function.
    ///
    /// With `FUSE_RS_EAGER` set, runs the body eagerly instead.
    pub fn call(&self, args: &[Arg]) -> FuseResult<Returned<Operand>> {
        if env::eager_enabled() {
            return self.call_eager(args);
        }
        let backend = self.backend();
        let signature = Signature::of(self.id, backend.name(), args);
        let bundle = self.cache.get_or_compile(&signature, || {
            debug!(function = self.name(), %signature, "cache miss, compiling");
            match trace_and_compile(&self.body, &signature, self.kernel_name(), backend.as_ref()) {
                Ok(bundle) => {
                    if let Some(hook) = &self.options.on_compile {
                        hook(&signature);
                    }
                    Ok(bundle)
                }
                Err(err) => {
                    warn!(function = self.name(), %signature, error = %err, "compile failed");
                    Err(err)
                }
            }
        })?;
        trace!(function = self.name(), %signature, "launching");
        launch(&bundle, args)
    }

    /// Runs the body op by op on concrete values, without fusing.
    pub fn call_eager(&self, args: &[Arg]) -> FuseResult<Returned<Operand>> {
        let operands: Vec<Option<Operand>> = args.iter().map(Arg::to_operand).collect();
        self.body.call(&Eager, &operands)
    }

    /// Drops every compiled signature. The next call recompiles.
    pub fn clear_cache(&self) {
        debug!(function = self.name(), "clearing kernel cache");
        self.cache.clear();
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<B: FusedBody> fmt::Debug for Fused<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fused")
            .field("name", &self.name())
            .field("id", &self.id)
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{required, ArrayModule};
    use crate::{Array, Shape};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Double;

    impl FusedBody for Double {
        fn name(&self) -> &str {
            "double"
        }

        fn doc(&self) -> Option<&str> {
            Some("Doubles its argument.")
        }

        fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
            let x = required(args, 0)?;
            Ok(Returned::Single(xp.add(&x, &x)?))
        }
    }

    #[test]
    fn test_metadata() {
        let f = fuse(Double);
        assert_eq!(f.name(), "double");
        assert_eq!(f.doc(), Some("Doubles its argument."));
        assert_eq!(f.kernel_name(), "double");
        let g = fuse_with(Double, FuseOptions::new().kernel_name("twice"));
        assert_eq!(g.kernel_name(), "twice");
        assert_ne!(f.id(), g.id());
    }

    #[test]
    fn test_compiles_once_per_signature() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let f = fuse_with(
            Double,
            FuseOptions::new().on_compile(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        for n in 1..4 {
            let x = Array::zeros(Shape::from([n]), crate::DType::Float32);
            f.call(&[Arg::from(&x)]).unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        f.call(&[Arg::from(1i64)]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        f.clear_cache();
        f.call(&[Arg::from(1i64)]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(f.cache_stats().entries, 1);
    }

    #[test]
    fn test_eager_matches() {
        let f = fuse(Double);
        let x = Array::from_vec_i64(vec![1, 2, 3], Shape::from([3]));
        let fused = f.call(&[Arg::from(&x)]).unwrap().single().unwrap();
        let eager = f.call_eager(&[Arg::from(&x)]).unwrap().single().unwrap();
        assert_eq!(fused.to_vec_i64(), eager.to_vec_i64());
        assert_eq!(fused.dtype(), eager.dtype());
    }
}
