//! Criterion benchmarks for the Processor's per-event hot path: stack
//! append and spectral transforms, the two stages that scale with scan
//! length.
//!
//! Run with: cargo bench --bench processor_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use xps_pipeline::messages::IntegratedLine;
use xps_pipeline::processor::spectral::{ifft_bandpass, vfft};
use xps_pipeline::processor::stack::IntegratedStack;

fn stack_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrated_stack_append");

    for width in [256usize, 1024, 4096] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::new("push", width), &width, |b, &width| {
            b.iter_batched(
                || IntegratedStack::new(width),
                |mut stack| {
                    for i in 0..1000 {
                        stack
                            .push(&IntegratedLine(vec![i as f64; width]))
                            .unwrap();
                    }
                    black_box(stack);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn spectral_transform_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectral_transform");

    for rows in [64usize, 256, 1024] {
        let width = 512;
        let matrix: Vec<Vec<f64>> = (0..rows)
            .map(|r| (0..width).map(|w| ((r + w) as f64).sin()).collect())
            .collect();

        group.throughput(Throughput::Elements((rows * width) as u64));
        group.bench_with_input(BenchmarkId::new("vfft", rows), &matrix, |b, matrix| {
            b.iter(|| black_box(vfft(matrix)));
        });
        group.bench_with_input(BenchmarkId::new("ifft_bandpass", rows), &matrix, |b, matrix| {
            b.iter(|| black_box(ifft_bandpass(matrix, 25, 0)));
        });
    }

    group.finish();
}

criterion_group!(benches, stack_append_throughput, spectral_transform_latency);
criterion_main!(benches);
