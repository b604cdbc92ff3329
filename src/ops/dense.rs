//! Dense linear algebra around the fused kernels, delegated to `ndarray`.
//!
//! Tensors are exposed to `ndarray` as zero-copy strided views, so transposed
//! or narrowed inputs flow into the GEMMs without a copy.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array, Array2, ArrayView1, ArrayView2, Axis, Dimension, ShapeBuilder, concatenate};

use crate::error::{LltmError, Result};
use crate::scalar::{Element, KernelFloat};
use crate::tensor::{Device, Tensor};

impl Tensor {
    /// Borrows a rank-1 tensor as an `ndarray` view.
    ///
    /// # Errors
    /// [`LltmError::ShapeMismatch`] for other ranks, [`LltmError::TypeMismatch`]
    /// if `T` is not the element type.
    pub fn as_array1<T: Element>(&self) -> Result<ArrayView1<'_, T>> {
        if self.dim() != 1 {
            return Err(LltmError::shape("as_array1", "self", format_args!("rank 1"), self.shape()));
        }
        let buffer = self.buffer::<T>("as_array1")?;
        ArrayView1::from_shape(
            self.shape()[0].strides(self.strides()[0]),
            buffer.get(self.offset()..).unwrap_or(&[]),
        )
        .map_err(|e| LltmError::layout(e.to_string()))
    }

    /// Borrows a rank-2 tensor as an `ndarray` view.
    ///
    /// # Errors
    /// [`LltmError::ShapeMismatch`] for other ranks, [`LltmError::TypeMismatch`]
    /// if `T` is not the element type.
    pub fn as_array2<T: Element>(&self) -> Result<ArrayView2<'_, T>> {
        if self.dim() != 2 {
            return Err(LltmError::shape("as_array2", "self", format_args!("rank 2"), self.shape()));
        }
        let buffer = self.buffer::<T>("as_array2")?;
        let (shape, strides) = (self.shape(), self.strides());
        ArrayView2::from_shape(
            (shape[0], shape[1]).strides((strides[0], strides[1])),
            buffer.get(self.offset()..).unwrap_or(&[]),
        )
        .map_err(|e| LltmError::layout(e.to_string()))
    }

    /// Copies an `ndarray` array into a new contiguous tensor on `device`.
    pub fn from_array<T: Element, D: Dimension>(array: &Array<T, D>, device: Device) -> Self {
        let shape = array.shape().to_vec();
        let data: Vec<T> = array.iter().copied().collect();
        Self::from_storage(T::into_storage(data), shape, device)
    }
}

/// Concatenates rank-2 tensors along their column (feature) axis.
pub(crate) fn cat_columns<T: KernelFloat>(parts: &[&Tensor]) -> Result<Tensor> {
    let views = parts
        .iter()
        .map(|t| t.as_array2::<T>())
        .collect::<Result<Vec<_>>>()?;
    let joined = concatenate(Axis(1), &views).map_err(|e| LltmError::layout(e.to_string()))?;
    Ok(Tensor::from_array(&joined, parts[0].device()))
}

/// `bias + x · weightsᵗ`, shape `(batch, rows of weights)`.
pub(crate) fn gate_projection<T: KernelFloat>(
    x: &Tensor,
    weights: &Tensor,
    bias: &Tensor,
) -> Result<Tensor> {
    let x_view = x.as_array2::<T>()?;
    let w = weights.as_array2::<T>()?;
    let b = bias.as_array1::<T>()?;

    let mut gates = Array2::from_shape_fn((x_view.nrows(), w.nrows()), |(_, j)| b[j]);
    general_mat_mul(T::one(), &x_view, &w.t(), T::one(), &mut gates);
    Ok(Tensor::from_array(&gates, x.device()))
}

/// Gradients of the gate projection given `d_gates` (batch, 3·state_size).
pub(crate) struct ProjectionGrads {
    pub d_weights: Tensor,
    pub d_bias: Tensor,
    pub d_x: Tensor,
}

pub(crate) fn gate_projection_backward<T: KernelFloat>(
    d_gates: &Tensor,
    x: &Tensor,
    weights: &Tensor,
) -> Result<ProjectionGrads> {
    let d_gates_view = d_gates.as_array2::<T>()?;
    let x_view = x.as_array2::<T>()?;
    let w = weights.as_array2::<T>()?;
    let device = d_gates.device();

    Ok(ProjectionGrads {
        d_weights: Tensor::from_array(&d_gates_view.t().dot(&x_view), device),
        d_bias: Tensor::from_array(&d_gates_view.sum_axis(Axis(0)), device),
        d_x: Tensor::from_array(&d_gates_view.dot(&w), device),
    })
}

#[cfg(test)]
mod tests {
    use crate::tensor;

    use super::*;

    #[test]
    fn projection_adds_bias_to_each_row() {
        let x = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let w = tensor!([[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        let b = Tensor::new(vec![3], vec![0.5f64, -0.5, 0.0]);
        let gates = gate_projection::<f64>(&x, &w, &b).unwrap();
        assert_eq!(gates, tensor!([[1.5, 1.5, 3.0], [3.5, 3.5, 7.0]]));
    }

    #[test]
    fn strided_views_feed_the_gemm_directly() {
        let w = tensor!([[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]).transpose(0, 1).unwrap();
        assert_eq!(w.as_array2::<f64>().unwrap()[[2, 1]], 6.0);
        let x = tensor!([[1.0, 1.0]]);
        let b = tensor!([0.0, 0.0, 0.0]);
        let gates = gate_projection::<f64>(&x, &w, &b).unwrap();
        assert_eq!(gates, tensor!([[3.0, 7.0, 11.0]]));
    }

    #[test]
    fn cat_columns_keeps_row_order() {
        let a = tensor!([[1.0f32], [2.0]]);
        let b = tensor!([[3.0f32, 4.0], [5.0, 6.0]]);
        let joined = cat_columns::<f32>(&[&a, &b]).unwrap();
        assert_eq!(joined, tensor!([[1.0f32, 3.0, 4.0], [2.0, 5.0, 6.0]]));
    }
}
