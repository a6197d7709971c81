//! Channel gating: a per-channel mask applied in both directions

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{PruneError, Result};
use ndarray::{Array1, ArrayD, IxDyn};
use std::rc::Rc;

/// Reshape a per-channel vector to (1, C, 1, 1) for broadcasting over NCHW.
pub(crate) fn broadcast_channels(values: &Array1<f32>) -> ArrayD<f32> {
    let c = values.len();
    ArrayD::from_shape_fn(IxDyn(&[1, c, 1, 1]), |idx| values[idx[1]])
}

/// Multiply an (N, C, H, W) activation by a per-channel mask.
///
/// Forward: `y * mask`. Backward: `dy * mask`, so a zeroed channel
/// contributes to neither the output nor the gradient of the layer below.
pub fn channel_mask(x: &Tensor, mask: &Array1<f32>) -> Result<Tensor> {
    let shape = x.shape();
    if shape.len() != 4 || shape[1] != mask.len() {
        return Err(PruneError::ShapeMismatch {
            expected: vec![shape.first().copied().unwrap_or(0), mask.len(), 0, 0],
            actual: shape.to_vec(),
        });
    }

    let gate = broadcast_channels(mask);
    let data = x.data() * &gate;
    Ok(Tensor::derived(data, x.requires_grad(), |result_grad| {
        Rc::new(ChannelMaskBackward {
            x: x.clone(),
            gate,
            result_grad,
        })
    }))
}

struct ChannelMaskBackward {
    x: Tensor,
    gate: ArrayD<f32>,
    result_grad: GradCell,
}

impl BackwardOp for ChannelMaskBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                self.x.accumulate_grad(grad * &self.gate);
            }
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    fn activation(requires_grad: bool) -> Tensor {
        let values: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        Tensor::from_shape_vec(&[1, 2, 2, 2], values, requires_grad).unwrap()
    }

    #[test]
    fn test_forward_zeroes_masked_channel() {
        let y = channel_mask(&activation(false), &arr1(&[0.0, 1.0])).unwrap();
        let data = y.data();
        for h in 0..2 {
            for w in 0..2 {
                assert_abs_diff_eq!(data[[0, 0, h, w]], 0.0);
            }
        }
        assert_abs_diff_eq!(data[[0, 1, 0, 0]], 5.0);
        assert_abs_diff_eq!(data[[0, 1, 1, 1]], 8.0);
    }

    #[test]
    fn test_backward_gates_gradient() {
        let x = activation(true);
        let mut y = channel_mask(&x, &arr1(&[1.0, 0.0])).unwrap();
        backward(&mut y, None);

        let grad = x.grad().expect("gradient should be available");
        assert_abs_diff_eq!(grad[[0, 0, 1, 0]], 1.0);
        assert_abs_diff_eq!(grad[[0, 1, 1, 0]], 0.0);
    }

    #[test]
    fn test_channel_count_must_match() {
        let err = channel_mask(&activation(false), &arr1(&[1.0, 1.0, 1.0])).unwrap_err();
        assert!(matches!(err, PruneError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_all_ones_mask_is_identity() {
        let x = activation(false);
        let y = channel_mask(&x, &arr1(&[1.0, 1.0])).unwrap();
        assert_eq!(y.data(), x.data());
    }
}
