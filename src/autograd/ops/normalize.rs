//! Normalization autograd operations: inference-form batch norm

use crate::autograd::ops::broadcast_channels;
use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{PruneError, Result};
use ndarray::{Array1, ArrayD};
use std::rc::Rc;

/// Batch normalization with frozen statistics
///
/// y = (x - mean) / sqrt(var + epsilon) * gamma + beta, per channel of an
/// (N, C, H, W) input. Folded into `y = x * scale + shift`.
pub fn batch_norm(
    x: &Tensor,
    gamma: &Array1<f32>,
    beta: &Array1<f32>,
    running_mean: &Array1<f32>,
    running_var: &Array1<f32>,
    epsilon: f32,
) -> Result<Tensor> {
    let c = gamma.len();
    if x.shape().len() != 4 || x.shape()[1] != c {
        return Err(PruneError::ShapeMismatch {
            expected: vec![x.shape().first().copied().unwrap_or(0), c, 0, 0],
            actual: x.shape().to_vec(),
        });
    }

    let scale: Array1<f32> = gamma / &running_var.mapv(|v| (v + epsilon).sqrt());
    let shift: Array1<f32> = beta - &(running_mean * &scale);
    let scale = broadcast_channels(&scale);
    let data = x.data() * &scale + &broadcast_channels(&shift);

    Ok(Tensor::derived(data, x.requires_grad(), |result_grad| {
        Rc::new(BatchNormBackward {
            x: x.clone(),
            scale,
            result_grad,
        })
    }))
}

struct BatchNormBackward {
    x: Tensor,
    scale: ArrayD<f32>,
    result_grad: GradCell,
}

impl BackwardOp for BatchNormBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                // ∂L/∂x = ∂L/∂y * gamma / sqrt(var + epsilon)
                self.x.accumulate_grad(grad * &self.scale);
            }
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.x]
    }
}
