//! Scalar nonlinearities of the LLTM cell and their derivatives.
//!
//! The ELU branch boundary is the strict comparison `z > 0` in both
//! directions, so the forward value and the derivative the backward pass
//! uses always come from the same branch. At `z = 0` (with `alpha = 1`) that
//! gives `elu(0) = 0` and `elu'(0) = 1`.

use num_traits::Float;

/// `1 / (1 + e^-z)`
#[inline]
pub fn sigmoid<T: Float>(z: T) -> T {
    T::one() / (T::one() + (-z).exp())
}

/// Derivative of [`sigmoid`] at the pre-activation `z`: `(1 - s) * s`.
#[inline]
pub fn d_sigmoid<T: Float>(z: T) -> T {
    let s = sigmoid(z);
    (T::one() - s) * s
}

/// `z` for `z > 0`, `alpha * (e^z - 1)` otherwise.
#[inline]
pub fn elu<T: Float>(z: T, alpha: T) -> T {
    if z > T::zero() {
        z
    } else {
        alpha * (z.exp() - T::one())
    }
}

/// Derivative of [`elu`] at the pre-activation `z`: `1` for `z > 0`, `alpha * e^z` otherwise.
#[inline]
pub fn d_elu<T: Float>(z: T, alpha: T) -> T {
    if z > T::zero() {
        T::one()
    } else {
        alpha * z.exp()
    }
}
