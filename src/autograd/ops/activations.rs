//! Rectified linear unit

use crate::autograd::{BackwardOp, GradCell, Tensor};
use ndarray::ArrayD;
use std::rc::Rc;

/// `max(x, 0)`; the gradient passes only where the input was positive
pub fn relu(x: &Tensor) -> Tensor {
    let data = x.data().mapv(|v| v.max(0.0));
    Tensor::derived(data, x.requires_grad(), |result_grad| {
        let gate = x.data().mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        Rc::new(ReluBackward {
            x: x.clone(),
            gate,
            result_grad,
        })
    })
}

struct ReluBackward {
    x: Tensor,
    gate: ArrayD<f32>,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            self.x.accumulate_grad(grad * &self.gate);
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.x]
    }
}
