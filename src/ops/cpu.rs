//! Fused LLTM elementwise kernels.
//!
//! # CPU Backend
//!
//! One kernel per direction, written once over [`KernelFloat`] and an accessor
//! width, and launched on either execution substrate through
//! [`substrate::launch`]. Every `(batch_index, column)` position is computed
//! independently from the values read through its accessors, so the
//! sequential loop and the rayon grid produce bit-identical planes.
//!
//! ## Implemented Ops
//!
//! - `lltm_forward`: gate nonlinearities and the state update
//! - `lltm_backward`: per-gate gradients and the carried cell gradient

use crate::accessor::{IndexType, PackedAccessor};
use crate::error::Result;
use crate::scalar::KernelFloat;
use crate::substrate::{self, Strategy};
use crate::tensor::Tensor;

use super::activation::{d_elu, d_sigmoid, elu, sigmoid};
use super::dense::cat_columns;
use super::{BackwardInputs, FusedBackward, FusedForward};

/// Gate planes along dimension 1 of the `(batch, 3, state_size)` gate tensor.
const INPUT_GATE: usize = 0;
const OUTPUT_GATE: usize = 1;
const CANDIDATE_CELL: usize = 2;

/// Forward kernel at one position.
///
/// Returns `[new_h, new_cell, input_gate, output_gate, candidate_cell]`.
#[inline]
pub(crate) fn forward_position<T: KernelFloat, I: IndexType>(
    gates: &PackedAccessor<'_, T, 3, I>,
    old_cell: &PackedAccessor<'_, T, 2, I>,
    n: usize,
    c: usize,
) -> [T; 5] {
    let input_gate = sigmoid(gates[[n, INPUT_GATE, c]]);
    let output_gate = sigmoid(gates[[n, OUTPUT_GATE, c]]);
    let candidate_cell = elu(gates[[n, CANDIDATE_CELL, c]], T::ELU_ALPHA);
    let new_cell = old_cell[[n, c]] + candidate_cell * input_gate;
    let new_h = new_cell.tanh() * output_gate;
    [new_h, new_cell, input_gate, output_gate, candidate_cell]
}

/// Accessors over every input of the backward kernel.
#[derive(Clone, Copy)]
pub(crate) struct BackwardAccessors<'a, T, I: IndexType> {
    pub grad_h: PackedAccessor<'a, T, 2, I>,
    pub grad_cell: PackedAccessor<'a, T, 2, I>,
    pub new_cell: PackedAccessor<'a, T, 2, I>,
    pub input_gate: PackedAccessor<'a, T, 2, I>,
    pub output_gate: PackedAccessor<'a, T, 2, I>,
    pub candidate_cell: PackedAccessor<'a, T, 2, I>,
    pub gates: PackedAccessor<'a, T, 3, I>,
}

impl<'a, T: KernelFloat, I: IndexType> BackwardAccessors<'a, T, I> {
    fn new(inputs: &BackwardInputs<'a>) -> Result<Self> {
        Ok(Self {
            grad_h: inputs.grad_h.packed_accessor()?,
            grad_cell: inputs.grad_cell.packed_accessor()?,
            new_cell: inputs.new_cell.packed_accessor()?,
            input_gate: inputs.input_gate.packed_accessor()?,
            output_gate: inputs.output_gate.packed_accessor()?,
            candidate_cell: inputs.candidate_cell.packed_accessor()?,
            gates: inputs.gates.packed_accessor()?,
        })
    }
}

/// Backward kernel at one position.
///
/// Returns `[d_input_gate_pre, d_output_gate_pre, d_candidate_pre, d_old_cell]`,
/// the first three being gradients with respect to the gate pre-activations.
#[inline]
pub(crate) fn backward_position<T: KernelFloat, I: IndexType>(
    a: &BackwardAccessors<'_, T, I>,
    n: usize,
    c: usize,
) -> [T; 4] {
    let grad_h = a.grad_h[[n, c]];
    let tanh_new_cell = a.new_cell[[n, c]].tanh();

    let d_output_gate = tanh_new_cell * grad_h;
    let d_tanh_new_cell = a.output_gate[[n, c]] * grad_h;
    let d_new_cell =
        (T::one() - tanh_new_cell * tanh_new_cell) * d_tanh_new_cell + a.grad_cell[[n, c]];

    let d_candidate_cell = a.input_gate[[n, c]] * d_new_cell;
    let d_input_gate = a.candidate_cell[[n, c]] * d_new_cell;

    [
        d_input_gate * d_sigmoid(a.gates[[n, INPUT_GATE, c]]),
        d_output_gate * d_sigmoid(a.gates[[n, OUTPUT_GATE, c]]),
        d_candidate_cell * d_elu(a.gates[[n, CANDIDATE_CELL, c]], T::ELU_ALPHA),
        d_new_cell,
    ]
}

/// Runs the forward kernel over `gates` `(batch, 3, state_size)` and
/// `old_cell` `(batch, state_size)`.
pub(crate) fn lltm_forward<T: KernelFloat, I: IndexType>(
    strategy: Strategy,
    tile_width: usize,
    gates: &Tensor,
    old_cell: &Tensor,
) -> Result<FusedForward> {
    let gates_acc = gates.packed_accessor::<T, 3, I>()?;
    let old_cell_acc = old_cell.packed_accessor::<T, 2, I>()?;
    let [batch, _, state_size] = gates_acc.sizes();

    let len = batch * state_size;
    let mut new_h = vec![T::ZERO; len];
    let mut new_cell = vec![T::ZERO; len];
    let mut input_gate = vec![T::ZERO; len];
    let mut output_gate = vec![T::ZERO; len];
    let mut candidate_cell = vec![T::ZERO; len];

    substrate::launch(
        "lltm_forward",
        strategy,
        tile_width,
        batch,
        state_size,
        [
            &mut new_h[..],
            &mut new_cell[..],
            &mut input_gate[..],
            &mut output_gate[..],
            &mut candidate_cell[..],
        ],
        |n, c| forward_position(&gates_acc, &old_cell_acc, n, c),
    );

    let plane = |data: Vec<T>| {
        Tensor::from_storage(T::into_storage(data), vec![batch, state_size], gates.device())
    };
    Ok(FusedForward {
        new_h: plane(new_h),
        new_cell: plane(new_cell),
        input_gate: plane(input_gate),
        output_gate: plane(output_gate),
        candidate_cell: plane(candidate_cell),
    })
}

/// Runs the backward kernel and joins the gate planes into `d_gates`.
pub(crate) fn lltm_backward<T: KernelFloat, I: IndexType>(
    strategy: Strategy,
    tile_width: usize,
    inputs: &BackwardInputs<'_>,
) -> Result<FusedBackward> {
    let accessors = BackwardAccessors::<T, I>::new(inputs)?;
    let [batch, _, state_size] = accessors.gates.sizes();

    let len = batch * state_size;
    let mut d_input_gate = vec![T::ZERO; len];
    let mut d_output_gate = vec![T::ZERO; len];
    let mut d_candidate = vec![T::ZERO; len];
    let mut d_old_cell = vec![T::ZERO; len];

    substrate::launch(
        "lltm_backward",
        strategy,
        tile_width,
        batch,
        state_size,
        [
            &mut d_input_gate[..],
            &mut d_output_gate[..],
            &mut d_candidate[..],
            &mut d_old_cell[..],
        ],
        |n, c| backward_position(&accessors, n, c),
    );

    let device = inputs.gates.device();
    let plane = |data: Vec<T>| Tensor::from_storage(T::into_storage(data), vec![batch, state_size], device);
    let d_gates = cat_columns::<T>(&[
        &plane(d_input_gate),
        &plane(d_output_gate),
        &plane(d_candidate),
    ])?;
    Ok(FusedBackward {
        d_gates,
        d_old_cell: plane(d_old_cell),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::tensor;

    use super::*;

    #[test]
    fn zero_gates_give_half_open_gates() {
        let gates = Tensor::zeros::<f64>(vec![1, 3, 1]);
        let old_cell = tensor!([[0.0]]);
        let acc_g = gates.packed_accessor64::<f64, 3>().unwrap();
        let acc_c = old_cell.packed_accessor64::<f64, 2>().unwrap();
        assert_eq!(forward_position(&acc_g, &acc_c, 0, 0), [0.0, 0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn narrow_and_wide_kernels_agree() {
        let gates = Tensor::new(vec![2, 3, 2], (0..12u8).map(|i| f32::from(i) * 0.3 - 1.7).collect());
        let old_cell = Tensor::new(vec![2, 2], vec![0.1f32, -0.2, 0.3, 0.4]);
        let narrow = lltm_forward::<f32, i32>(Strategy::Parallel, 1, &gates, &old_cell).unwrap();
        let wide = lltm_forward::<f32, i64>(Strategy::Sequential, 1024, &gates, &old_cell).unwrap();
        assert_eq!(narrow.new_h, wide.new_h);
        assert_eq!(narrow.candidate_cell, wide.candidate_cell);
    }

    #[test]
    fn backward_gate_planes_are_concatenated() {
        let gates = Tensor::zeros::<f64>(vec![1, 3, 2]);
        let old_cell = Tensor::zeros::<f64>(vec![1, 2]);
        let fwd = lltm_forward::<f64, i64>(Strategy::Sequential, 1, &gates, &old_cell).unwrap();
        let ones = Tensor::ones::<f64>(vec![1, 2]);
        let bwd = lltm_backward::<f64, i64>(
            Strategy::Sequential,
            1,
            &BackwardInputs {
                grad_h: &ones,
                grad_cell: &ones,
                new_cell: &fwd.new_cell,
                input_gate: &fwd.input_gate,
                output_gate: &fwd.output_gate,
                candidate_cell: &fwd.candidate_cell,
                gates: &gates,
            },
        )
        .unwrap();
        assert_eq!(bwd.d_gates.shape(), &[1, 6]);
        // new_cell = 0: d_new_cell = 0.5 + 1, d_candidate_pre = 0.5 * 1.5 * elu'(0)
        let d = bwd.d_gates.to_vec::<f64>().unwrap();
        assert_abs_diff_eq!(d[0], 0.0);
        assert_abs_diff_eq!(d[2], 0.0);
        assert_abs_diff_eq!(d[4], 0.75);
        assert_eq!(bwd.d_old_cell, tensor!([[1.5, 1.5]]));
    }
}
