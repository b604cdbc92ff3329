//! Forward and backward engines of the LLTM cell.
//!
//! # Forward
//!
//! ```text
//! X              = [old_h | input]                     (batch, state_size + input_features)
//! gates          = bias + X · weightsᵗ                 (batch, 3, state_size)
//! input_gate     = sigmoid(gates[:, 0])
//! output_gate    = sigmoid(gates[:, 1])
//! candidate_cell = elu(gates[:, 2])
//! new_cell       = old_cell + candidate_cell * input_gate
//! new_h          = tanh(new_cell) * output_gate
//! ```
//!
//! The projection runs through `ndarray`; the elementwise tail is one fused
//! kernel. Every intermediate the backward pass needs is kept in a
//! [`SavedContext`] so nothing is recomputed there.
//!
//! # Backward
//!
//! The fused backward kernel produces the gradient of every gate
//! pre-activation and of `old_cell`; `d_weights`, `d_bias` and `d_X` follow
//! from dense algebra, and `d_X` is split back into `d_old_h` and `d_input`
//! the same way `X` was assembled.
//!
//! # Example
//!
//! ```rust
//! use lltm::{cell, Tensor};
//!
//! let (batch, features, state) = (2, 3, 4);
//! let input = Tensor::ones::<f32>(vec![batch, features]);
//! let weights = Tensor::full(vec![3 * state, features + state], 0.1f32);
//! let bias = Tensor::zeros::<f32>(vec![3 * state]);
//! let old_h = Tensor::zeros::<f32>(vec![batch, state]);
//! let old_cell = Tensor::zeros::<f32>(vec![batch, state]);
//!
//! let out = cell::forward(&input, &weights, &bias, &old_h, &old_cell).unwrap();
//! assert_eq!(out.new_h().shape(), &[batch, state]);
//!
//! let ones = Tensor::ones::<f32>(vec![batch, state]);
//! let grads = cell::backward(&ones, &ones, &out.saved).unwrap();
//! assert_eq!(grads.d_weights.shape(), weights.shape());
//! ```

use tracing::{debug, instrument};

use crate::config::LaunchConfig;
use crate::error::{LltmError, Result};
use crate::ops::dense::{cat_columns, gate_projection, gate_projection_backward};
use crate::ops::{BackwardInputs, dispatch};
use crate::scalar::check_same_scalar_type;
use crate::substrate::Strategy;
use crate::tensor::{Tensor, check_same_device};

/// The recurrent state carried between timesteps.
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    /// `(batch, state_size)`
    pub hidden: Tensor,
    /// `(batch, state_size)`
    pub cell: Tensor,
}

/// Everything one forward call saves for its backward call.
///
/// Must be passed to [`backward`] unmodified.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedContext {
    pub new_cell: Tensor,
    pub input_gate: Tensor,
    pub output_gate: Tensor,
    pub candidate_cell: Tensor,
    /// `[old_h | input]`, `(batch, state_size + input_features)`.
    pub x: Tensor,
    /// Gate pre-activations, `(batch, 3, state_size)`.
    pub gates: Tensor,
    pub weights: Tensor,
}

/// Result of [`forward`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutput {
    pub state: CellState,
    pub saved: SavedContext,
}

impl ForwardOutput {
    #[must_use]
    pub const fn new_h(&self) -> &Tensor {
        &self.state.hidden
    }

    #[must_use]
    pub const fn new_cell(&self) -> &Tensor {
        &self.state.cell
    }
}

/// Result of [`backward`]: one gradient per forward input.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub d_old_h: Tensor,
    pub d_input: Tensor,
    pub d_weights: Tensor,
    pub d_bias: Tensor,
    pub d_old_cell: Tensor,
}

/// Runs one LLTM step with the default [`LaunchConfig`].
///
/// # Errors
/// See [`forward_with`].
pub fn forward(
    input: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
    old_h: &Tensor,
    old_cell: &Tensor,
) -> Result<ForwardOutput> {
    forward_with(&LaunchConfig::default(), input, weights, bias, old_h, old_cell)
}

/// Runs one LLTM step.
///
/// `input` is `(batch, input_features)`, `old_h` and `old_cell` are
/// `(batch, state_size)`, `weights` is
/// `(3 * state_size, input_features + state_size)` and `bias` is
/// `(3 * state_size)`. Outputs live on the inputs' device.
///
/// # Errors
/// Checked in this order, before anything is computed:
/// - [`LltmError::InvalidConfig`] for an unusable `config`
/// - [`LltmError::TypeMismatch`] if the tensors disagree on element type
/// - [`LltmError::DeviceMismatch`] if they disagree on device
/// - [`LltmError::ShapeMismatch`] if any shape violates the above
/// - [`LltmError::UnsupportedType`] for half-precision tensors
/// - [`LltmError::IndexOverflow`] if a narrow accessor cannot address a tensor
#[instrument(name = "lltm_forward", skip_all)]
pub fn forward_with(
    config: &LaunchConfig,
    input: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
    old_h: &Tensor,
    old_cell: &Tensor,
) -> Result<ForwardOutput> {
    const OP: &str = "lltm_forward";

    let config = config.validated()?;
    let named = [
        ("input", input),
        ("weights", weights),
        ("bias", bias),
        ("old_h", old_h),
        ("old_cell", old_cell),
    ];
    let scalar_type = check_same_scalar_type(OP, &named)?;
    let device = check_same_device(OP, &named)?;

    expect_rank(OP, "input", input, 2, "(batch, input_features)")?;
    let [batch, input_features] = [input.shape()[0], input.shape()[1]];
    expect_rank(OP, "old_h", old_h, 2, "(batch, state_size)")?;
    let state_size = old_h.shape()[1];
    expect_shape(OP, "old_h", old_h, &[batch, state_size])?;
    expect_shape(OP, "old_cell", old_cell, &[batch, state_size])?;
    expect_shape(OP, "weights", weights, &[3 * state_size, input_features + state_size])?;
    expect_shape(OP, "bias", bias, &[3 * state_size])?;

    let strategy = Strategy::for_device(device);
    debug!(batch, input_features, state_size, %scalar_type, ?strategy, "forward");

    crate::dispatch_floating_types!(scalar_type, OP, |T| {
        let x = cat_columns::<T>(&[old_h, input])?;
        let gates = gate_projection::<T>(&x, weights, bias)?.reshape([batch, 3, state_size])?;
        let fused = dispatch::lltm_forward::<T>(strategy, &config, &gates, old_cell)?;

        Ok(ForwardOutput {
            state: CellState {
                hidden: fused.new_h,
                cell: fused.new_cell.clone(),
            },
            saved: SavedContext {
                new_cell: fused.new_cell,
                input_gate: fused.input_gate,
                output_gate: fused.output_gate,
                candidate_cell: fused.candidate_cell,
                x,
                gates,
                weights: weights.clone(),
            },
        })
    })
}

/// Gradients of one LLTM step with the default [`LaunchConfig`].
///
/// # Errors
/// See [`backward_with`].
pub fn backward(grad_h: &Tensor, grad_cell: &Tensor, saved: &SavedContext) -> Result<Gradients> {
    backward_with(&LaunchConfig::default(), grad_h, grad_cell, saved)
}

/// Gradients of one LLTM step given the upstream gradients of
/// `(new_h, new_cell)` and the context saved by the matching forward call.
///
/// # Errors
/// The same checks, in the same order, as [`forward_with`]; every saved
/// tensor must have the shape the forward call gave it.
#[instrument(name = "lltm_backward", skip_all)]
pub fn backward_with(
    config: &LaunchConfig,
    grad_h: &Tensor,
    grad_cell: &Tensor,
    saved: &SavedContext,
) -> Result<Gradients> {
    const OP: &str = "lltm_backward";

    let config = config.validated()?;
    let named = [
        ("grad_h", grad_h),
        ("grad_cell", grad_cell),
        ("new_cell", &saved.new_cell),
        ("input_gate", &saved.input_gate),
        ("output_gate", &saved.output_gate),
        ("candidate_cell", &saved.candidate_cell),
        ("x", &saved.x),
        ("gates", &saved.gates),
        ("weights", &saved.weights),
    ];
    let scalar_type = check_same_scalar_type(OP, &named)?;
    let device = check_same_device(OP, &named)?;

    expect_rank(OP, "new_cell", &saved.new_cell, 2, "(batch, state_size)")?;
    let [batch, state_size] = [saved.new_cell.shape()[0], saved.new_cell.shape()[1]];
    for (name, tensor) in [
        ("grad_h", grad_h),
        ("grad_cell", grad_cell),
        ("input_gate", &saved.input_gate),
        ("output_gate", &saved.output_gate),
        ("candidate_cell", &saved.candidate_cell),
    ] {
        expect_shape(OP, name, tensor, &[batch, state_size])?;
    }
    expect_shape(OP, "gates", &saved.gates, &[batch, 3, state_size])?;
    expect_rank(OP, "x", &saved.x, 2, "(batch, state_size + input_features)")?;
    let width = saved.x.shape()[1];
    if saved.x.shape()[0] != batch || width < state_size {
        return Err(LltmError::shape(
            OP,
            "x",
            format_args!("[{batch}, >= {state_size}]"),
            saved.x.shape(),
        ));
    }
    expect_shape(OP, "weights", &saved.weights, &[3 * state_size, width])?;

    let strategy = Strategy::for_device(device);
    debug!(batch, state_size, %scalar_type, ?strategy, "backward");

    let inputs = BackwardInputs {
        grad_h,
        grad_cell,
        new_cell: &saved.new_cell,
        input_gate: &saved.input_gate,
        output_gate: &saved.output_gate,
        candidate_cell: &saved.candidate_cell,
        gates: &saved.gates,
    };

    crate::dispatch_floating_types!(scalar_type, OP, |T| {
        let fused = dispatch::lltm_backward::<T>(strategy, &config, &inputs)?;
        let dense = gate_projection_backward::<T>(&fused.d_gates, &saved.x, &saved.weights)?;

        Ok(Gradients {
            d_old_h: dense.d_x.narrow(1, 0, state_size)?.contiguous(),
            d_input: dense.d_x.narrow(1, state_size, width - state_size)?.contiguous(),
            d_weights: dense.d_weights,
            d_bias: dense.d_bias,
            d_old_cell: fused.d_old_cell,
        })
    })
}

fn expect_rank(
    op: &'static str,
    name: &'static str,
    tensor: &Tensor,
    rank: usize,
    layout: &str,
) -> Result<()> {
    if tensor.dim() == rank {
        Ok(())
    } else {
        Err(LltmError::shape(op, name, format_args!("{layout}"), tensor.shape()))
    }
}

fn expect_shape(op: &'static str, name: &'static str, tensor: &Tensor, shape: &[usize]) -> Result<()> {
    if tensor.shape() == shape {
        Ok(())
    } else {
        Err(LltmError::shape(op, name, shape, tensor.shape()))
    }
}
