//! Planning, generation and execution benchmarks
//!
//! Run with: cargo bench --bench plan_generate

use conv1x1_jit::prelude::*;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// (ic, oc, h, w) of common pointwise layers
const SHAPES: &[(usize, usize, usize, usize)] = &[
    (64, 64, 56, 56),
    (256, 64, 56, 56),
    (512, 128, 28, 28),
    (1024, 256, 14, 14),
    (2048, 512, 7, 7),
];

fn problem(direction: Direction, ic: usize, oc: usize, h: usize, w: usize) -> ConvProblem {
    let weights = match direction {
        Direction::BackwardData => MemoryFormat::IOhw16o16i,
        _ => MemoryFormat::OIhw16i16o,
    };
    ConvProblem::new(
        direction,
        TensorDesc::new(&[1, ic, h, w], DataType::F32, MemoryFormat::NChw16c),
        TensorDesc::new(&[oc, ic, 1, 1], DataType::F32, weights),
        TensorDesc::new(&[1, oc, h, w], DataType::F32, MemoryFormat::NChw16c),
    )
}

// =============================================================================
// Planning
// =============================================================================

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let planner = ConfigPlanner::new(SyntheticCpu::avx512(16));

    for direction in [
        Direction::ForwardInference,
        Direction::BackwardData,
        Direction::BackwardWeights,
    ] {
        for &(ic, oc, h, w) in SHAPES {
            let request = PlanRequest::new(problem(direction, ic, oc, h, w));
            let id = format!("{direction}/{ic}x{oc}x{h}x{w}");
            group.bench_with_input(BenchmarkId::from_parameter(id), &request, |b, request| {
                b.iter(|| planner.plan(black_box(request)))
            });
        }
    }

    group.finish();
}

// =============================================================================
// Generation
// =============================================================================

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");

    for (name, caps) in [
        ("fma", SyntheticCpu::avx512(16)),
        ("4fma", SyntheticCpu::avx512_mic(16)),
    ] {
        for &(ic, oc, h, w) in SHAPES {
            let request = PlanRequest::new(problem(Direction::ForwardInference, ic, oc, h, w));
            let Ok(config) = ConfigPlanner::new(caps.clone()).plan(&request) else {
                continue;
            };
            let id = format!("{name}/{ic}x{oc}x{h}x{w}");
            group.bench_with_input(BenchmarkId::from_parameter(id), &config, |b, config| {
                b.iter(|| EmittedKernel::new(black_box(config.clone())))
            });
        }
    }

    group.finish();
}

// =============================================================================
// Execution
// =============================================================================

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute_forward");
    group.sample_size(10);

    for &(ic, oc, h, w) in &SHAPES[2..] {
        let request = PlanRequest::new(problem(Direction::ForwardInference, ic, oc, h, w))
            .with_threads(1);
        let Ok(kernel) = conv1x1_jit::generate(SyntheticCpu::avx512(1), &request) else {
            continue;
        };

        let s = h * w;
        let src = vec![0.5f32; ic * s];
        let weights = vec![0.25f32; oc * ic];
        let mut dst = vec![0.0f32; oc * s];

        // one call over the whole image
        let desc = CallDescriptor {
            bcast_data: src.as_ptr().cast(),
            load_data: weights.as_ptr().cast(),
            output_data: dst.as_mut_ptr().cast(),
            load_dim: oc,
            bcast_dim: s,
            reduce_dim: ic,
            flags: FLAG_REDUCE_FIRST | FLAG_REDUCE_LAST,
            ..CallDescriptor::default()
        };

        group.throughput(Throughput::Elements((2 * ic * oc * s) as u64));
        group.bench_function(BenchmarkId::from_parameter(format!("{ic}x{oc}x{h}x{w}")), |b| {
            // SAFETY: the buffers hold the full image, weights and output for this kernel
            b.iter(|| unsafe { kernel.execute(black_box(&desc)) })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan, bench_generate, bench_execute);
criterion_main!(benches);
