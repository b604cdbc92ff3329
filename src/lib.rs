//! lltm: fused forward and backward kernels for the LLTM recurrent cell.
//!
//! The LLTM cell is a gated recurrent cell whose gate nonlinearities and
//! state update are fused into a single elementwise kernel, preceded by one
//! dense projection. This crate computes one step of it and the exact
//! gradients of that step.
//!
//! # Features
//!
//! - Strided tensor views over shared typed buffers, with zero-copy
//!   narrowing and transposition.
//! - Packed accessors with 32-bit or 64-bit offset arithmetic.
//! - One generic kernel per direction, instantiated for `f32` and `f64` and
//!   selected at run time from the tensors' element type.
//! - Two execution substrates: a sequential loop for host tensors and a
//!   rayon grid launch for accelerator tensors, with bit-identical results.
//! - Optional `wgpu` realization of the grid launch for `f32`.
//!
//! # Modules
//!
//! - [`cell`]: the forward and backward engines.
//! - [`tensor`]: tensor views and the `tensor!` literal macro.
//! - [`accessor`]: kernel-side indexing.
//! - [`scalar`]: element types and the type dispatcher.
//! - [`substrate`]: sequential and parallel launches.
//! - [`backend`]: global selection of the parallel realization.
//! - [`config`]: per-call launch tunables.
//! - [`ops`]: the kernels themselves.
//!
//! # Example
//!
//! ```rust
//! use lltm::{cell, tensor, Tensor};
//!
//! let input = tensor!([[1.0]]);
//! let weights = Tensor::zeros::<f64>(vec![3, 2]);
//! let bias = tensor!([0.0, 0.0, 0.0]);
//! let old_h = tensor!([[0.0]]);
//! let old_cell = tensor!([[0.0]]);
//!
//! let out = cell::forward(&input, &weights, &bias, &old_h, &old_cell).unwrap();
//! assert_eq!(out.saved.input_gate, tensor!([[0.5]]));
//! assert_eq!(out.new_h(), &tensor!([[0.0]]));
//! ```

pub mod accessor;
pub mod backend;
pub mod cell;
pub mod config;
pub mod error;
pub mod ops;
pub mod scalar;
pub mod substrate;
pub mod tensor;

pub use accessor::{IndexWidth, PackedAccessor, PackedAccessor32, PackedAccessor64};
pub use cell::{CellState, ForwardOutput, Gradients, SavedContext, backward, backward_with, forward, forward_with};
pub use config::LaunchConfig;
pub use error::{LltmError, Result};
pub use scalar::{Element, KernelFloat, ScalarType};
pub use tensor::{Device, Tensor};
