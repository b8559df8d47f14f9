//! # fuse-rs: kernel fusion for array functions
//!
//! Write an elementwise array function once, generic over an
//! [`ArrayModule`], and let `fuse-rs` turn it into a small number of
//! kernels.
//!
//! ## Key Features
//!
//! - **Trace once per signature**: the body runs against placeholders the
//!   first time a dtype/rank combination is seen; later calls reuse it
//! - **NumPy semantics**: ufunc type resolution, broadcasting, in-place
//!   operators and `out=` with same-kind casting
//! - **Fusion**: every elementwise operation plus at most one reduction
//!   becomes one kernel, with dead code removed
//! - **Eager fallback**: the same body runs op by op for debugging
//! - **Thread safe**: a fused function may be called from many threads;
//!   each signature compiles once
//!
//! ## Quick Start
//!
//! ```rust
//! use fuse_rs::{fuse, required, Arg, Array, ArrayModule, FuseResult, FusedBody, Returned, Shape};
//!
//! struct SquaredDiff;
//!
//! impl FusedBody for SquaredDiff {
//!     fn name(&self) -> &str {
//!         "squared_diff"
//!     }
//!
//!     fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
//!         let x = required(args, 0)?;
//!         let y = required(args, 1)?;
//!         let d = xp.subtract(&x, &y)?;
//!         Ok(Returned::Single(xp.multiply(&d, &d)?))
//!     }
//! }
//!
//! let f = fuse(SquaredDiff);
//! let x = Array::from_vec_f32(vec![1.0, 2.0, 3.0], Shape::from([3]));
//! let z = f.call(&[Arg::from(&x), Arg::from(1.0f64)])?.single().unwrap();
//! assert_eq!(z.to_vec_f64(), vec![0.0, 1.0, 4.0]);
//! # Ok::<(), fuse_rs::FuseError>(())
//! ```
//!
//! ## Environment
//!
//! - `FUSE_RS_EAGER`: fused calls run eagerly instead of compiling
//! - `FUSE_RS_DUMP_SOURCE`: generated kernel source is logged at debug level

#![warn(missing_docs)]
#![warn(clippy::all)]

mod array;
pub mod backend;
mod buffer;
mod device;
mod dtype;
mod env;
mod error;
mod module;
pub mod ops;
mod scalar;
mod shape;
pub mod trace;

// Public exports
pub use array::Array;
pub use backend::{CompiledKernel, HostBackend, KernelBackend, LaunchArgs};
pub use device::{current_backend, set_default_backend, with_backend};
pub use dtype::{Category, DType, Kind};
pub use error::{FuseError, FuseResult, ShapeError, TraceError};
pub use module::{required, Arg, ArgKind, Arity, ArrayModule, FusedBody, Operand, Returned};
pub use ops::eager::Eager;
pub use ops::reduce::ReduceOp;
pub use ops::ufunc::Ufunc;
pub use scalar::{Elem, Scalar};
pub use shape::{Region, Shape};
pub use trace::{fuse, fuse_with, CacheStats, FuseOptions, Fused, Signature};
