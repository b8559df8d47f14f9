//! Concurrent callers of one fused function.

use approx::assert_relative_eq;
use fuse_rs::{
    fuse_with, required, Arg, Array, ArrayModule, DType, FuseOptions, FuseResult, FusedBody,
    Returned, Shape,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 100;

/// `a * x + y`
struct Axpy;

impl FusedBody for Axpy {
    fn name(&self) -> &str {
        "axpy"
    }

    fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
        let a = required(args, 0)?;
        let x = required(args, 1)?;
        let y = required(args, 2)?;
        let ax = xp.multiply(&a, &x)?;
        Ok(Returned::Single(xp.add(&ax, &y)?))
    }
}

#[test]
fn test_concurrent_callers_compile_once_per_signature() {
    let compiles = Arc::new(AtomicUsize::new(0));
    let seen = compiles.clone();
    let f = fuse_with(
        Axpy,
        FuseOptions::new().on_compile(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for i in 0..THREADS {
            let f = &f;
            let barrier = &barrier;
            s.spawn(move || {
                let dtype = if i % 2 == 0 { DType::Float32 } else { DType::Float64 };
                let n = 16 + i % 5;
                let x = Array::from_vec_f64((0..n).map(|v| v as f64).collect(), Shape::from([n])).astype(dtype);
                let y = Array::full(i as f64, Shape::from([n])).astype(dtype);
                barrier.wait();
                let out = f
                    .call(&[Arg::from(2.0f64), Arg::from(&x), Arg::from(&y)])
                    .unwrap()
                    .single()
                    .unwrap();
                assert_eq!(out.dtype(), dtype);
                for (k, v) in out.to_vec_f64().into_iter().enumerate() {
                    assert_relative_eq!(v, 2.0 * k as f64 + i as f64, max_relative = 1e-6);
                }
            });
        }
    });

    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    let stats = f.cache_stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.compiles, 2);
    assert_eq!(stats.hits + stats.misses, THREADS as u64);
}

#[test]
fn test_concurrent_in_place_updates_are_independent() {
    struct Accumulate;

    impl FusedBody for Accumulate {
        fn name(&self) -> &str {
            "accumulate"
        }

        fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
            let acc = required(args, 0)?;
            let x = required(args, 1)?;
            xp.iadd(&acc, &x)?;
            Ok(Returned::None)
        }
    }

    let f = fuse_with(Accumulate, FuseOptions::new());
    thread::scope(|s| {
        for i in 0..8i64 {
            let f = &f;
            s.spawn(move || {
                let acc = Array::zeros(Shape::from([4]), DType::Int64);
                for _ in 0..10 {
                    f.call(&[Arg::from(&acc), Arg::from(i)]).unwrap();
                }
                assert_eq!(acc.to_vec_i64(), vec![10 * i; 4]);
            });
        }
    });
    assert_eq!(f.cache_stats().compiles, 1);
}
