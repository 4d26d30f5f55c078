//! Strategy construction latency.
//!
//! Measures each stage a compiler pays per matched matmul:
//! 1. Configuration + validation
//! 2. Mapping derivation
//! 3. Script building
//! 4. A full parameter sweep (parallel)

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tcgen::{build_script, sweep, sweep_grid, MatmulCaptures, MatmulStrategy, StrategyOverrides};
use tcgen::target::GpuTarget;

fn bench_validate(c: &mut Criterion) {
    let captures = MatmulCaptures::f32(4096, 4096, 4096);
    c.bench_function("configure_and_validate", |b| {
        b.iter(|| {
            let s = MatmulStrategy::new(
                black_box(captures),
                GpuTarget::sm80(),
                &StrategyOverrides::default(),
            );
            s.validate().is_ok()
        })
    });
}

fn bench_mappings(c: &mut Criterion) {
    let s = MatmulStrategy::with_defaults(MatmulCaptures::f32(1000, 2048, 512));
    c.bench_function("derive_mappings", |b| {
        b.iter(|| {
            let s = black_box(&s);
            (
                s.block_mapping(),
                s.compute_mapping(),
                s.lhs_copy_mapping(),
                s.rhs_copy_mapping(),
                s.res_copy_mapping(),
            )
        })
    });
}

fn bench_build(c: &mut Criterion) {
    let aligned = MatmulStrategy::with_defaults(MatmulCaptures::default());
    let unaligned = MatmulStrategy::with_defaults(MatmulCaptures::f32(1000, 1000, 1000));

    let mut group = c.benchmark_group("build_script");
    group.bench_function("aligned", |b| b.iter(|| build_script(black_box(&aligned))));
    group.bench_function("unaligned", |b| {
        b.iter(|| build_script(black_box(&unaligned)))
    });
    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let base = MatmulStrategy::with_defaults(MatmulCaptures::default());
    let points = sweep_grid(&[64, 128, 256], &[16, 32], &[1, 2, 3, 4]);
    c.bench_function("sweep_72", |b| b.iter(|| sweep(&base, black_box(&points))));
}

criterion_group!(benches, bench_validate, bench_mappings, bench_build, bench_sweep);
criterion_main!(benches);
