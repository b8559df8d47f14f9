use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fuse_rs::{
    fuse, required, Arg, Array, ArrayModule, DType, FuseResult, FusedBody, Returned, Shape,
};

/// `(x - y) * (x - y) + 0.5 * x`
struct Blend;

impl FusedBody for Blend {
    fn name(&self) -> &str {
        "blend"
    }

    fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
        let x = required(args, 0)?;
        let y = required(args, 1)?;
        let d = xp.subtract(&x, &y)?;
        let sq = xp.multiply(&d, &d)?;
        let half = xp.multiply(&xp.constant(0.5f64), &x)?;
        Ok(Returned::Single(xp.add(&sq, &half)?))
    }
}

/// `sqrt(sum(x * x))`
struct Norm;

impl FusedBody for Norm {
    fn name(&self) -> &str {
        "norm"
    }

    fn call<M: ArrayModule>(&self, xp: &M, args: &[Option<M::Value>]) -> FuseResult<Returned<M::Value>> {
        let x = required(args, 0)?;
        let sq = xp.multiply(&x, &x)?;
        let total = xp.sum(&sq, None)?;
        Ok(Returned::Single(xp.sqrt(&total)?))
    }
}

fn inputs(n: usize) -> (Array, Array) {
    let x = Array::from_vec_f32((0..n).map(|i| i as f32).collect(), Shape::from([n]));
    let y = Array::full(1.0f32, Shape::from([n]));
    (x, y)
}

fn bench_elementwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("blend");
    let f = fuse(Blend);
    for &n in &[1_000usize, 10_000] {
        let (x, y) = inputs(n);
        let args = [Arg::from(&x), Arg::from(&y)];
        group.bench_with_input(BenchmarkId::new("fused", n), &args, |b, args| {
            b.iter(|| f.call(black_box(args)))
        });
        group.bench_with_input(BenchmarkId::new("eager", n), &args, |b, args| {
            b.iter(|| f.call_eager(black_box(args)))
        });
    }
    group.finish();
}

fn bench_reduction(c: &mut Criterion) {
    let mut group = c.benchmark_group("norm");
    let f = fuse(Norm);
    for &n in &[1_000usize, 10_000] {
        let (x, _) = inputs(n);
        let args = [Arg::from(&x)];
        group.bench_with_input(BenchmarkId::new("fused", n), &args, |b, args| {
            b.iter(|| f.call(black_box(args)))
        });
        group.bench_with_input(BenchmarkId::new("eager", n), &args, |b, args| {
            b.iter(|| f.call_eager(black_box(args)))
        });
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let f = fuse(Blend);
    let x = Array::zeros(Shape::from([1]), DType::Float64);
    let args = [Arg::from(&x), Arg::from(1.0f64)];

    c.bench_function("cache hit", |b| b.iter(|| f.call(black_box(&args))));

    c.bench_function("trace and compile", |b| {
        b.iter(|| {
            f.clear_cache();
            f.call(black_box(&args))
        })
    });
}

criterion_group!(benches, bench_elementwise, bench_reduction, bench_dispatch);
criterion_main!(benches);
