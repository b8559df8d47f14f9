//! Per-function cache of compiled kernels, keyed by call signature.
//!
//! A signature is what fixes the traced graph: the function, the backend,
//! and for each positional argument its kind, dtype and rank. Concrete
//! shapes are not part of it.
//!
//! Entries are once-cells. The first caller to miss compiles while later
//! callers with the same signature block on the cell and then share the
//! result, so each signature is compiled at most once. A failed compile
//! leaves the cell empty and the next call tries again.

use crate::error::FuseResult;
use crate::module::{Arg, ArgKind};
use crate::trace::executor::CompiledBundle;
use crate::DType;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a fused function.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u64);

impl FunctionId {
    /// A fresh, process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        FunctionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Signature entry of one positional argument.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ParamKey {
    /// Array, scalar or absent.
    pub kind: ArgKind,
    /// Dtype; `None` for absent arguments.
    pub dtype: Option<DType>,
    /// Rank; 0 for scalars and absent arguments.
    pub ndim: usize,
}

impl ParamKey {
    /// Key of a concrete argument.
    pub fn of(arg: &Arg) -> Self {
        Self {
            kind: arg.kind(),
            dtype: arg.dtype(),
            ndim: arg.ndim(),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.dtype) {
            (ArgKind::Array, Some(d)) => write!(f, "{d}[{}d]", self.ndim),
            (ArgKind::Scalar, Some(d)) => write!(f, "{d}"),
            _ => f.write_str("none"),
        }
    }
}

/// Cache key of a compiled fused function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// The fused function.
    pub function: FunctionId,
    /// Backend the kernels are compiled for.
    pub backend: &'static str,
    /// One key per positional argument.
    pub params: Vec<ParamKey>,
}

impl Signature {
    /// Signature of a call of `function` with `args` on `backend`.
    pub fn of(function: FunctionId, backend: &'static str, args: &[Arg]) -> Self {
        Self {
            function,
            backend,
            params: args.iter().map(ParamKey::of).collect(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}(", self.function, self.backend)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        f.write_str(")")
    }
}

/// Counters of a [`KernelCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Calls served by an already compiled entry.
    pub hits: u64,
    /// Calls that found no compiled entry.
    pub misses: u64,
    /// Successful compilations.
    pub compiles: u64,
    /// Compiled entries currently held.
    pub entries: usize,
}

type Slot = Arc<OnceCell<Arc<CompiledBundle>>>;

/// Signature-keyed cache of compiled bundles.
#[derive(Default)]
pub struct KernelCache {
    entries: Mutex<FxHashMap<Signature, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
}

impl KernelCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bundle for `signature`, compiling it with `compile` on a
    /// miss.
    ///
    /// The map lock is held only to find the slot; compilation runs outside
    /// it, so different signatures compile concurrently.
    pub fn get_or_compile<F>(&self, signature: &Signature, compile: F) -> FuseResult<Arc<CompiledBundle>>
    where
        F: FnOnce() -> FuseResult<CompiledBundle>,
    {
        let slot = self.entries.lock().entry(signature.clone()).or_default().clone();
        if let Some(bundle) = slot.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bundle.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        slot.get_or_try_init(|| {
            let bundle = compile()?;
            self.compiles.fetch_add(1, Ordering::Relaxed);
            Ok(Arc::new(bundle))
        })
        .cloned()
    }

    /// Drops every entry. Compilations in flight finish but are not kept.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.entries.lock());
        drop(old);
    }

    /// Number of compiled entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// Returns true if nothing is compiled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl fmt::Debug for KernelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FuseError, TraceError};
    use crate::module::Arity;
    use crate::trace::ir::GraphBuilder;
    use crate::{Array, Shape};

    fn bundle() -> CompiledBundle {
        let graph = GraphBuilder::new().finish("k".into(), vec![], Arity::None, vec![]);
        CompiledBundle {
            graph: Arc::new(graph),
            kernels: vec![],
            hazards: vec![],
            failure: None,
        }
    }

    fn sig(args: &[Arg]) -> Signature {
        Signature::of(FunctionId(7), "host", args)
    }

    #[test]
    fn test_signature_ignores_shape() {
        let a = Arg::from(Array::zeros(Shape::from([2, 3]), DType::Float32));
        let b = Arg::from(Array::zeros(Shape::from([5, 1]), DType::Float32));
        let c = Arg::from(Array::zeros(Shape::from([6]), DType::Float32));
        assert_eq!(sig(&[a.clone()]), sig(&[b]));
        assert_ne!(sig(&[a.clone()]), sig(&[c]));
        assert_ne!(sig(&[a.clone()]), Signature::of(FunctionId(8), "host", &[a.clone()]));
        assert_ne!(sig(&[Arg::from(1i32)]), sig(&[Arg::from(1i64)]));
        assert_ne!(sig(&[Arg::from(1i64)]), sig(&[Arg::Absent]));
        assert_eq!(sig(&[a, Arg::from(2.0f64), Arg::Absent]).to_string(), "fn#7@host(float32[2d], float64, none)");
    }

    #[test]
    fn test_compile_once() {
        let cache = KernelCache::new();
        let s = sig(&[Arg::from(1i64)]);
        let first = cache.get_or_compile(&s, || Ok(bundle())).unwrap();
        let second = cache
            .get_or_compile(&s, || panic!("compiled twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.compiles, stats.entries), (1, 1, 1, 1));
    }

    #[test]
    fn test_failed_compile_is_retried() {
        let cache = KernelCache::new();
        let s = sig(&[]);
        let err = cache
            .get_or_compile(&s, || Err(TraceError::Unsupported("boom".into()).into()))
            .unwrap_err();
        assert!(matches!(err, FuseError::Trace(_)));
        assert!(cache.is_empty());
        assert!(cache.get_or_compile(&s, || Ok(bundle())).is_ok());
        assert_eq!(cache.stats().compiles, 1);
    }

    #[test]
    fn test_clear() {
        let cache = KernelCache::new();
        cache.get_or_compile(&sig(&[]), || Ok(bundle())).unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_compile(&sig(&[]), || Ok(bundle())).unwrap();
        assert_eq!(cache.stats().compiles, 2);
    }
}
