//! Backend selection module.
//!
//! Tensors tagged [`Device::Accelerator`](crate::Device::Accelerator) run on
//! the parallel substrate. This module picks *how* that substrate is realized:
//!
//! - `Cpu`: grid launch over the rayon thread pool (default).
//! - `Wgpu`: WGSL compute shaders through `wgpu` (requires the `wgpu`
//!   feature; `f32` only). Falls back to `Cpu` when unavailable.
//!
//! The backend is stored globally using an `AtomicU8`, enabling fast
//! switching between CPU and GPU modes at runtime.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Realization of the parallel execution substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Rayon grid launch (default).
    #[default]
    Cpu = 0,
    /// GPU compute shaders using `wgpu`.
    Wgpu = 1,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
///
/// This uses relaxed memory ordering because the backend is only expected
/// to change rarely, and not in real-time concurrent compute contexts.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the backend used for accelerator tensors.
///
/// # Example
/// ```
/// use lltm::backend::{set_backend, get_backend, Backend};
/// set_backend(Backend::Wgpu);
/// assert_eq!(get_backend(), Backend::Wgpu);
/// set_backend(Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Relaxed);
}

/// Returns the currently active backend.
///
/// If the stored value is invalid, defaults to `Backend::Cpu`.
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Relaxed)).unwrap_or(Backend::Cpu)
}
