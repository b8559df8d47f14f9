//! Backend selection.
//!
//! Fused functions compile for the current backend unless their options pin
//! one. The current backend is the innermost [`with_backend`] scope on this
//! thread, falling back to the process default, which starts out as
//! [`HostBackend`].

use crate::backend::{HostBackend, KernelBackend};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

static DEFAULT_BACKEND: OnceLock<RwLock<Arc<dyn KernelBackend>>> = OnceLock::new();

thread_local! {
    static SCOPED: RefCell<Vec<Arc<dyn KernelBackend>>> = const { RefCell::new(Vec::new()) };
}

fn default_slot() -> &'static RwLock<Arc<dyn KernelBackend>> {
    DEFAULT_BACKEND.get_or_init(|| RwLock::new(Arc::new(HostBackend)))
}

/// The backend fused calls on this thread compile for.
///
/// # Examples
///
/// ```
/// assert_eq!(fuse_rs::current_backend().name(), "host");
/// ```
pub fn current_backend() -> Arc<dyn KernelBackend> {
    SCOPED
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| default_slot().read().clone())
}

/// Replaces the process-wide default backend, returning the previous one.
pub fn set_default_backend(backend: Arc<dyn KernelBackend>) -> Arc<dyn KernelBackend> {
    std::mem::replace(&mut *default_slot().write(), backend)
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPED.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Runs `f` with `backend` as the current backend on this thread.
///
/// Scopes nest; the previous backend is restored when `f` returns or
/// unwinds.
pub fn with_backend<R>(backend: Arc<dyn KernelBackend>, f: impl FnOnce() -> R) -> R {
    SCOPED.with(|stack| stack.borrow_mut().push(backend));
    let _guard = ScopeGuard;
    f()
}
