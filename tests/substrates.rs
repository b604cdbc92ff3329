//! The sequential loop and the rayon grid must agree bit for bit.

use lltm::{Device, IndexWidth, LaunchConfig, Tensor, backward_with, forward_with};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Case {
    input: Tensor,
    weights: Tensor,
    bias: Tensor,
    old_h: Tensor,
    old_cell: Tensor,
    grad_h: Tensor,
    grad_cell: Tensor,
}

impl Case {
    fn random(batch: usize, features: usize, state: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut t = |shape: Vec<usize>| {
            let data: Vec<f32> = (0..shape.iter().product::<usize>())
                .map(|_| rng.random_range(-2.0..2.0))
                .collect();
            Tensor::new(shape, data)
        };
        Self {
            input: t(vec![batch, features]),
            weights: t(vec![3 * state, features + state]),
            bias: t(vec![3 * state]),
            old_h: t(vec![batch, state]),
            old_cell: t(vec![batch, state]),
            grad_h: t(vec![batch, state]),
            grad_cell: t(vec![batch, state]),
        }
    }

    fn on(&self, device: Device) -> Self {
        Self {
            input: self.input.to_device(device),
            weights: self.weights.to_device(device),
            bias: self.bias.to_device(device),
            old_h: self.old_h.to_device(device),
            old_cell: self.old_cell.to_device(device),
            grad_h: self.grad_h.to_device(device),
            grad_cell: self.grad_cell.to_device(device),
        }
    }

    /// Every output of one forward + backward round, flattened.
    fn run(&self, config: &LaunchConfig) -> Vec<Vec<f32>> {
        let out = forward_with(config, &self.input, &self.weights, &self.bias, &self.old_h, &self.old_cell)
            .unwrap();
        let grads = backward_with(config, &self.grad_h, &self.grad_cell, &out.saved).unwrap();
        [
            out.new_h(),
            out.new_cell(),
            &out.saved.input_gate,
            &out.saved.output_gate,
            &out.saved.candidate_cell,
            &grads.d_old_h,
            &grads.d_input,
            &grads.d_weights,
            &grads.d_bias,
            &grads.d_old_cell,
        ]
        .iter()
        .map(|t| t.to_vec::<f32>().unwrap())
        .collect()
    }
}

#[test]
fn test_sequential_and_grid_agree() {
    for (batch, features, state) in [(1, 1, 1), (3, 5, 7), (4, 2, 33), (2, 8, 1030)] {
        let case = Case::random(batch, features, state, (batch * 1000 + state) as u64);
        let expected = case.run(&LaunchConfig::default());

        let accelerated = case.on(Device::Accelerator);
        for tile_width in [1, 3, 5, 32, 1024] {
            for index_width in [IndexWidth::Narrow, IndexWidth::Wide] {
                let config = LaunchConfig::default()
                    .with_tile_width(tile_width)
                    .with_index_width(index_width);
                assert_eq!(
                    accelerated.run(&config),
                    expected,
                    "batch {batch}, state {state}, tile {tile_width}, {index_width}"
                );
            }
        }
    }
}

#[test]
fn test_grid_outputs_stay_on_the_accelerator() {
    let case = Case::random(2, 3, 4, 9).on(Device::Accelerator);
    let out = forward_with(
        &LaunchConfig::default(),
        &case.input,
        &case.weights,
        &case.bias,
        &case.old_h,
        &case.old_cell,
    )
    .unwrap();
    let grads = backward_with(&LaunchConfig::default(), &case.grad_h, &case.grad_cell, &out.saved).unwrap();
    for t in [out.new_h(), &out.saved.x, &grads.d_weights, &grads.d_old_cell] {
        assert_eq!(t.device(), Device::Accelerator);
    }
}
