//! Switches the process-global backend, so it lives in its own test binary.

use approx::assert_abs_diff_eq;
use lltm::backend::{Backend, get_backend, set_backend};
use lltm::{Device, Tensor, backward, forward};

fn step(device: Device) -> Vec<Vec<f32>> {
    let seq = |n: usize, scale: f32| -> Vec<f32> {
        (0..n).map(|i| (i as f32 * scale).cos()).collect()
    };
    let (batch, features, state) = (3, 4, 300);
    let t = |shape: Vec<usize>, scale| {
        let n = shape.iter().product();
        Tensor::new(shape, seq(n, scale)).to_device(device)
    };

    let out = forward(
        &t(vec![batch, features], 0.3),
        &t(vec![3 * state, features + state], 0.011),
        &t(vec![3 * state], 0.7),
        &t(vec![batch, state], 0.13),
        &t(vec![batch, state], 0.17),
    )
    .unwrap();
    let grads = backward(&t(vec![batch, state], 0.19), &t(vec![batch, state], 0.23), &out.saved).unwrap();
    [out.new_h(), out.new_cell(), &grads.d_weights, &grads.d_old_cell]
        .iter()
        .map(|t| t.to_vec::<f32>().unwrap())
        .collect()
}

#[test]
fn test_wgpu_backend_matches_or_falls_back() {
    assert_eq!(get_backend(), Backend::Cpu);
    let reference = step(Device::Host);

    set_backend(Backend::Wgpu);
    assert_eq!(get_backend(), Backend::Wgpu);
    let accelerated = step(Device::Accelerator);
    set_backend(Backend::Cpu);

    for (a, b) in accelerated.iter().zip(&reference) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-3);
        }
    }
}

#[test]
fn test_backend_round_trips_through_u8() {
    assert_eq!(Backend::try_from(1u8), Ok(Backend::Wgpu));
    assert_eq!(Backend::try_from(0u8), Ok(Backend::Cpu));
    assert!(Backend::try_from(7u8).is_err());
}
