use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use lltm::{Device, IndexWidth, LaunchConfig, Tensor, backward_with, forward_with};

const BATCH: usize = 16;
const FEATURES: usize = 32;

struct Inputs {
    input: Tensor,
    weights: Tensor,
    bias: Tensor,
    old_h: Tensor,
    old_cell: Tensor,
}

fn inputs(state: usize, device: Device) -> Inputs {
    let t = |shape: Vec<usize>| {
        let n: usize = shape.iter().product();
        let data = (0..n).map(|i| ((i % 97) as f32 * 0.013).sin()).collect();
        Tensor::new(shape, data).to_device(device)
    };
    Inputs {
        input: t(vec![BATCH, FEATURES]),
        weights: t(vec![3 * state, FEATURES + state]),
        bias: t(vec![3 * state]),
        old_h: t(vec![BATCH, state]),
        old_cell: t(vec![BATCH, state]),
    }
}

fn bench_substrates(c: &mut Criterion) {
    let mut group = c.benchmark_group("lltm_step");
    group.measurement_time(Duration::from_secs(5));

    let configs = [
        ("sequential", Device::Host, LaunchConfig::default()),
        ("grid_narrow", Device::Accelerator, LaunchConfig::default()),
        (
            "grid_wide",
            Device::Accelerator,
            LaunchConfig::default().with_index_width(IndexWidth::Wide),
        ),
        (
            "grid_tile_64",
            Device::Accelerator,
            LaunchConfig::default().with_tile_width(64),
        ),
    ];

    for state in [128, 1024, 4096] {
        group.throughput(Throughput::Elements((BATCH * state) as u64));
        for (name, device, config) in &configs {
            let x = inputs(state, *device);
            let ones = Tensor::ones::<f32>(vec![BATCH, state]).to_device(*device);

            group.bench_with_input(BenchmarkId::new(format!("{name}/forward"), state), &x, |b, x| {
                b.iter(|| {
                    forward_with(config, &x.input, &x.weights, &x.bias, &x.old_h, &x.old_cell).unwrap()
                });
            });

            let out = forward_with(config, &x.input, &x.weights, &x.bias, &x.old_h, &x.old_cell).unwrap();
            group.bench_with_input(BenchmarkId::new(format!("{name}/backward"), state), &out.saved, |b, saved| {
                b.iter(|| backward_with(config, black_box(&ones), &ones, saved).unwrap());
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_substrates);
criterion_main!(benches);
