//! Element types and the scalar-type dispatcher.
//!
//! Tensors carry their element type as a runtime tag ([`ScalarType`]). Kernels
//! are written once, generic over [`KernelFloat`], and instantiated for every
//! supported type at compile time. [`dispatch_floating_types!`] is the single
//! point where the runtime tag selects one of those instantiations.
//!
//! # Example
//!
//! ```rust
//! use lltm::{dispatch_floating_types, ScalarType};
//!
//! fn size_of_tag(tag: ScalarType) -> lltm::Result<usize> {
//!     dispatch_floating_types!(tag, "size_of_tag", |T| {
//!         Ok(core::mem::size_of::<T>())
//!     })
//! }
//!
//! assert_eq!(size_of_tag(ScalarType::F64).unwrap(), 8);
//! assert!(size_of_tag(ScalarType::F16).is_err());
//! ```

use core::fmt;

use half::{bf16, f16};

use crate::error::{LltmError, Result};
use crate::tensor::{Storage, Tensor};

/// Runtime element-type tag of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    F64,
    /// IEEE half precision; storage only.
    F16,
    /// bfloat16; storage only.
    BF16,
}

impl ScalarType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Whether the fused kernels have an instantiation for this type.
    #[must_use]
    pub const fn has_kernels(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        })
    }
}

/// A Rust type that can back a [`Tensor`].
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    /// The tag tensors of this type carry.
    const SCALAR_TYPE: ScalarType;
    /// Additive identity, used to initialize output buffers.
    const ZERO: Self;

    /// Borrows the storage as `[Self]`, or `None` if it holds another type.
    fn storage_slice(storage: &Storage) -> Option<&[Self]>;

    /// Wraps a buffer in the matching storage variant.
    fn into_storage(data: Vec<Self>) -> Storage;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $zero:expr) => {
        impl Element for $ty {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;
            const ZERO: Self = $zero;

            fn storage_slice(storage: &Storage) -> Option<&[Self]> {
                match storage {
                    Storage::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn into_storage(data: Vec<Self>) -> Storage {
                Storage::$variant(data)
            }
        }
    };
}

impl_element!(f32, F32, 0.0);
impl_element!(f64, F64, 0.0);
impl_element!(f16, F16, f16::ZERO);
impl_element!(bf16, BF16, bf16::ZERO);

/// Element types the fused kernels are instantiated for.
///
/// Arithmetic comes from [`num_traits::Float`]; [`ndarray::LinalgScalar`] lets
/// the same type flow through the dense algebra around the kernels.
pub trait KernelFloat: Element + num_traits::Float + ndarray::LinalgScalar {
    /// `alpha` of the candidate-cell ELU.
    const ELU_ALPHA: Self;
}

impl KernelFloat for f32 {
    const ELU_ALPHA: Self = 1.0;
}

impl KernelFloat for f64 {
    const ELU_ALPHA: Self = 1.0;
}

/// Runs `body` with `$T` bound to the concrete type matching a runtime tag.
///
/// The body is expanded once per supported type, so each expansion is
/// monomorphized at the tensor's native precision. The body must evaluate to
/// a [`Result`](crate::Result); unsupported tags evaluate to
/// [`LltmError::UnsupportedType`](crate::LltmError::UnsupportedType).
#[macro_export]
macro_rules! dispatch_floating_types {
    ($scalar_type:expr, $op:expr, |$T:ident| $body:block) => {
        match $scalar_type {
            $crate::ScalarType::F32 => {
                #[allow(non_camel_case_types, dead_code)]
                type $T = f32;
                $body
            }
            $crate::ScalarType::F64 => {
                #[allow(non_camel_case_types, dead_code)]
                type $T = f64;
                $body
            }
            other => Err($crate::LltmError::UnsupportedType {
                op: $op,
                scalar_type: other,
            }),
        }
    };
}

/// Checks every named tensor shares the first one's element type.
///
/// Returns that common type.
///
/// # Errors
/// [`LltmError::TypeMismatch`] naming the first tensor that disagrees.
///
/// # Panics
/// Panics if `tensors` is empty.
pub fn check_same_scalar_type(
    op: &'static str,
    tensors: &[(&'static str, &Tensor)],
) -> Result<ScalarType> {
    let expected = tensors[0].1.scalar_type();
    for &(name, tensor) in &tensors[1..] {
        if tensor.scalar_type() != expected {
            return Err(LltmError::TypeMismatch {
                op,
                tensor: name,
                expected,
                actual: tensor.scalar_type(),
            });
        }
    }
    Ok(expected)
}
