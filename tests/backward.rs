use approx::assert_relative_eq;
use lltm::{Tensor, backward, forward};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BATCH: usize = 2;
const FEATURES: usize = 3;
const STATE: usize = 4;

/// input, weights, bias, old_h, old_cell
const SHAPES: [&[usize]; 5] = [
    &[BATCH, FEATURES],
    &[3 * STATE, FEATURES + STATE],
    &[3 * STATE],
    &[BATCH, STATE],
    &[BATCH, STATE],
];
const NAMES: [&str; 5] = ["input", "weights", "bias", "old_h", "old_cell"];

fn random(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn tensors(data: &[Vec<f64>; 5]) -> Vec<Tensor> {
    data.iter()
        .zip(SHAPES)
        .map(|(d, shape)| Tensor::new(shape.to_vec(), d.clone()))
        .collect()
}

/// `sum(grad_h * new_h) + sum(grad_cell * new_cell)`
fn loss(data: &[Vec<f64>; 5], grad_h: &[f64], grad_cell: &[f64]) -> f64 {
    let t = tensors(data);
    let out = forward(&t[0], &t[1], &t[2], &t[3], &t[4]).unwrap();
    let dot = |t: &Tensor, w: &[f64]| -> f64 {
        t.to_vec::<f64>().unwrap().iter().zip(w).map(|(a, b)| a * b).sum()
    };
    dot(out.new_h(), grad_h) + dot(out.new_cell(), grad_cell)
}

fn check_gradients(grad_h: &[f64], grad_cell: &[f64], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: [Vec<f64>; 5] = SHAPES.map(|s| random(&mut rng, s.iter().product()));

    let t = tensors(&data);
    let out = forward(&t[0], &t[1], &t[2], &t[3], &t[4]).unwrap();
    let grads = backward(
        &Tensor::new(vec![BATCH, STATE], grad_h.to_vec()),
        &Tensor::new(vec![BATCH, STATE], grad_cell.to_vec()),
        &out.saved,
    )
    .unwrap();
    let analytic = [
        &grads.d_input,
        &grads.d_weights,
        &grads.d_bias,
        &grads.d_old_h,
        &grads.d_old_cell,
    ];

    let eps = 1e-6;
    for (k, name) in NAMES.iter().enumerate() {
        assert_eq!(analytic[k].shape(), SHAPES[k], "shape of d_{name}");
        let values = analytic[k].to_vec::<f64>().unwrap();
        for i in 0..data[k].len() {
            let mut plus = data.clone();
            plus[k][i] += eps;
            let mut minus = data.clone();
            minus[k][i] -= eps;
            let numeric = (loss(&plus, grad_h, grad_cell) - loss(&minus, grad_h, grad_cell)) / (2.0 * eps);
            assert_relative_eq!(values[i], numeric, epsilon = 1e-6, max_relative = 1e-4);
        }
    }
}

#[test]
fn test_gradients_of_summed_outputs() {
    let ones = vec![1.0; BATCH * STATE];
    check_gradients(&ones, &ones, 0x5eed);
}

#[test]
fn test_gradients_of_weighted_outputs() {
    let mut rng = StdRng::seed_from_u64(42);
    let grad_h = random(&mut rng, BATCH * STATE);
    let grad_cell = random(&mut rng, BATCH * STATE);
    check_gradients(&grad_h, &grad_cell, 7);
}

#[test]
fn test_cell_gradient_passes_through_without_hidden_gradient() {
    let mut rng = StdRng::seed_from_u64(3);
    let data: [Vec<f64>; 5] = SHAPES.map(|s| random(&mut rng, s.iter().product()));
    let t = tensors(&data);
    let out = forward(&t[0], &t[1], &t[2], &t[3], &t[4]).unwrap();

    let grad_cell = Tensor::new(vec![BATCH, STATE], random(&mut rng, BATCH * STATE));
    let grads = backward(&Tensor::zeros::<f64>(vec![BATCH, STATE]), &grad_cell, &out.saved).unwrap();
    assert_eq!(grads.d_old_cell, grad_cell);
}
