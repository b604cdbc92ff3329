//! Error taxonomy for the LLTM engines.
//!
//! Every variant here is raised eagerly, at the boundary of
//! [`forward`](crate::cell::forward) / [`backward`](crate::cell::backward),
//! before any kernel is launched. Nothing is retried and nothing is coerced.
//!
//! Indexing an accessor out of range is *not* represented here: it is a
//! contract violation and panics.

use crate::accessor::IndexWidth;
use crate::scalar::ScalarType;
use crate::tensor::Device;

/// Errors surfaced by tensor construction and the LLTM engines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LltmError {
    /// A tensor's shape violates an operation's preconditions.
    #[error("{op}: `{tensor}` has shape {actual:?}, expected {expected}")]
    ShapeMismatch {
        op: &'static str,
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    /// Tensors taking part in one invocation disagree on element type.
    #[error("{op}: `{tensor}` has element type {actual}, expected {expected}")]
    TypeMismatch {
        op: &'static str,
        tensor: &'static str,
        expected: ScalarType,
        actual: ScalarType,
    },

    /// The element type has no kernel instantiation.
    #[error("{op}: element type {scalar_type} is not supported (expected f32 or f64)")]
    UnsupportedType {
        op: &'static str,
        scalar_type: ScalarType,
    },

    /// Tensors taking part in one invocation live on different devices.
    #[error("{op}: `{tensor}` is on {actual:?}, expected {expected:?}")]
    DeviceMismatch {
        op: &'static str,
        tensor: &'static str,
        expected: Device,
        actual: Device,
    },

    /// The operation needs a contiguous (row-major, dense) tensor.
    #[error("{op}: tensor is not contiguous")]
    NotContiguous { op: &'static str },

    /// A shape/stride/offset triple does not fit the backing buffer.
    #[error("invalid tensor layout: {reason}")]
    InvalidLayout { reason: String },

    /// A [`LaunchConfig`](crate::LaunchConfig) field is unusable.
    #[error("invalid launch config: {reason}")]
    InvalidConfig { reason: String },

    /// The tensor cannot be addressed with the requested accessor width.
    #[error("tensor extent {extent} does not fit a {width} accessor")]
    IndexOverflow { extent: usize, width: IndexWidth },
}

/// Shorthand used across the crate.
pub type Result<T, E = LltmError> = std::result::Result<T, E>;

impl LltmError {
    pub(crate) fn shape(
        op: &'static str,
        tensor: &'static str,
        expected: impl core::fmt::Debug,
        actual: &[usize],
    ) -> Self {
        Self::ShapeMismatch {
            op,
            tensor,
            expected: format!("{expected:?}"),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn layout(reason: impl Into<String>) -> Self {
        Self::InvalidLayout {
            reason: reason.into(),
        }
    }
}
