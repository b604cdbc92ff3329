//! # Kernel Layer
//!
//! Everything the cell engines run below the validation boundary.
//!
//! ## Submodules
//!
//! - [`activation`]: scalar nonlinearities and their derivatives
//! - `dense`: gate projection and its gradients, delegated to `ndarray`
//! - `cpu`: the fused elementwise kernels, run on either execution substrate
//! - `wgpu` *(opt-in)*: the same kernels as WGSL compute shaders
//! - `dispatch`: picks the realization of one launch from the strategy,
//!   the global [`Backend`](crate::backend::Backend) and the accessor width
//!
//! ## Feature Flags
//!
//! - `wgpu`: enables the `wgpu` realization of the parallel substrate

pub mod activation;
pub(crate) mod cpu;
pub(crate) mod dense;
pub(crate) mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use crate::tensor::Tensor;

/// The five `(batch, state_size)` planes of one fused forward launch.
#[derive(Debug, Clone)]
pub(crate) struct FusedForward {
    pub new_h: Tensor,
    pub new_cell: Tensor,
    pub input_gate: Tensor,
    pub output_gate: Tensor,
    pub candidate_cell: Tensor,
}

/// Inputs of one fused backward launch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BackwardInputs<'a> {
    pub grad_h: &'a Tensor,
    pub grad_cell: &'a Tensor,
    pub new_cell: &'a Tensor,
    pub input_gate: &'a Tensor,
    pub output_gate: &'a Tensor,
    pub candidate_cell: &'a Tensor,
    /// `(batch, 3, state_size)` pre-activations.
    pub gates: &'a Tensor,
}

/// Outputs of one fused backward launch.
#[derive(Debug, Clone)]
pub(crate) struct FusedBackward {
    /// `(batch, 3 * state_size)`, gate planes side by side.
    pub d_gates: Tensor,
    pub d_old_cell: Tensor,
}
