//! Process-loop benchmarks per processing mode

use criterion::{criterion_group, criterion_main, Criterion};
use sona_spread::{ProcessingMode, Spreader, FRAME_SIZE};

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("spreader_process");

    for (name, mode) in [
        ("naive", ProcessingMode::Naive),
        ("optimal_mixing", ProcessingMode::OptimalMixing),
        ("evd", ProcessingMode::Evd),
    ] {
        let sp = Spreader::new(48_000.0);
        sp.set_processing_mode(mode);
        sp.set_source_spread(0, 120.0);
        sp.init_codec();

        let input: Vec<f32> = (0..FRAME_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0).sin())
            .collect();
        let mut left = vec![0.0f32; FRAME_SIZE];
        let mut right = vec![0.0f32; FRAME_SIZE];

        group.bench_function(name, |b| {
            b.iter(|| {
                let inputs: Vec<&[f32]> = vec![&input];
                let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
                sp.process(&inputs, &mut outputs);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process);
criterion_main!(benches);
