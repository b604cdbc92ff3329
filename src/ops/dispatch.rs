//! Launch Dispatch Layer
//!
//! Selects the realization of one fused launch. Parallel launches try the
//! backend chosen with [`set_backend`](crate::backend::set_backend) first:
//!
//! 1. `Wgpu` (if the feature is enabled and the element type is `f32`)
//! 2. Falls back to the rayon grid
//!
//! The CPU realization is then instantiated at the accessor width the
//! [`LaunchConfig`] asks for on this strategy.

use tracing::debug;

use crate::accessor::IndexWidth;
use crate::backend::{Backend, get_backend};
use crate::config::LaunchConfig;
use crate::error::Result;
use crate::scalar::KernelFloat;
use crate::substrate::Strategy;
use crate::tensor::Tensor;

use super::{BackwardInputs, FusedBackward, FusedForward};

/// Dispatches the fused forward kernel.
pub(crate) fn lltm_forward<T: KernelFloat>(
    strategy: Strategy,
    config: &LaunchConfig,
    gates: &Tensor,
    old_cell: &Tensor,
) -> Result<FusedForward> {
    if strategy == Strategy::Parallel && get_backend() == Backend::Wgpu {
        #[cfg(feature = "wgpu")]
        {
            if let Some(result) = super::wgpu::wgpu_lltm_forward(gates, old_cell) {
                return Ok(result);
            }
        }
        debug!(op = "lltm_forward", "wgpu launch unavailable, using the rayon grid");
    }

    let tile_width = config.tile_width();
    match config.index_width_for(strategy) {
        IndexWidth::Narrow => super::cpu::lltm_forward::<T, i32>(strategy, tile_width, gates, old_cell),
        IndexWidth::Wide => super::cpu::lltm_forward::<T, i64>(strategy, tile_width, gates, old_cell),
    }
}

/// Dispatches the fused backward kernel.
pub(crate) fn lltm_backward<T: KernelFloat>(
    strategy: Strategy,
    config: &LaunchConfig,
    inputs: &BackwardInputs<'_>,
) -> Result<FusedBackward> {
    if strategy == Strategy::Parallel && get_backend() == Backend::Wgpu {
        #[cfg(feature = "wgpu")]
        {
            if let Some(result) = super::wgpu::wgpu_lltm_backward(inputs) {
                return Ok(result);
            }
        }
        debug!(op = "lltm_backward", "wgpu launch unavailable, using the rayon grid");
    }

    let tile_width = config.tile_width();
    match config.index_width_for(strategy) {
        IndexWidth::Narrow => super::cpu::lltm_backward::<T, i32>(strategy, tile_width, inputs),
        IndexWidth::Wide => super::cpu::lltm_backward::<T, i64>(strategy, tile_width, inputs),
    }
}
