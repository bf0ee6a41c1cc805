//! Common Mode Correction Benchmarks
//!
//! Single cell estimation and full batch correction throughput.

use std::sync::Arc;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tpc_bench::{BlockSpec, PAD_COUNTS, WORKER_COUNTS, generate_block, generate_calibration};
use tpc_cmc::{CmData, CmDebug, CmcConfig, CommonModeEstimator, CorrectionEngine, RandomRing};
use tpc_core::TpcGeometry;

fn cell_data(n_pads: usize, seed: u64) -> CmData {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut data = CmData::with_capacity(n_pads);
    for _ in 0..n_pads {
        let pedestal = 70.0 + rng.random::<f32>() * 10.0;
        let signal = if rng.random_bool(0.05) { 150.0 } else { 0.0 };
        data.push(pedestal - 2.0 + rng.random::<f32>() + signal, 1.0, pedestal);
    }
    data
}

/// Benchmark one cell per region pad count
fn bench_estimator(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimator");

    for &n_pads in PAD_COUNTS {
        group.throughput(Throughput::Elements(n_pads as u64));
        let data = cell_data(n_pads, 42);

        let hardware = CommonModeEstimator::new(&CmcConfig::hardware());
        let mut rng = RandomRing::new(1 << 16, 1);
        group.bench_with_input(BenchmarkId::new("hardware", n_pads), &n_pads, |b, _| {
            b.iter(|| black_box(hardware.estimate_data(&data, &mut rng, None)))
        });

        let validation = CommonModeEstimator::new(&CmcConfig::validation());
        group.bench_with_input(BenchmarkId::new("validation", n_pads), &n_pads, |b, _| {
            b.iter(|| black_box(validation.estimate_data(&data, &mut rng, None)))
        });

        let mut debug = CmDebug::new(hardware.random_sample_count(), n_pads);
        group.bench_with_input(BenchmarkId::new("with_debug", n_pads), &n_pads, |b, _| {
            b.iter(|| black_box(hardware.estimate_data(&data, &mut rng, Some(&mut debug))))
        });
    }

    group.finish();
}

/// Benchmark the two-pass batch correction per worker count
fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.sample_size(20);

    let spec = BlockSpec {
        groups: 20,
        time_bins: 8,
        ..Default::default()
    };
    let calibration = Arc::new(generate_calibration(&spec, &TpcGeometry, 1));
    let block = generate_block(&spec, &TpcGeometry, &calibration, 2);
    group.throughput(Throughput::Elements(block.len() as u64));

    for &workers in WORKER_COUNTS {
        let engine = match CorrectionEngine::new(
            CmcConfig::hardware().with_workers(workers),
            Arc::clone(&calibration),
            Arc::new(TpcGeometry),
        ) {
            Ok(engine) => engine,
            Err(e) => panic!("engine setup failed: {e}"),
        };

        group.bench_with_input(BenchmarkId::new("process", workers), &workers, |b, _| {
            b.iter_batched(
                || block.clone(),
                |mut samples| black_box(engine.process(&mut samples)),
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_estimator, bench_engine);
criterion_main!(benches);
