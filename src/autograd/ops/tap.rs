//! Identity op that reports the gradient reaching a tensor

use crate::autograd::{BackwardOp, GradCell, Tensor};
use ndarray::ArrayD;
use std::rc::Rc;

/// Callback receiving `(output, grad_output)` when the gradient arrives.
pub type TapFn = Rc<dyn Fn(&ArrayD<f32>, &ArrayD<f32>)>;

/// Pass `x` through unchanged and call `on_grad` during backward.
///
/// Inputs that do not require gradients are returned as-is: nothing would
/// ever flow back to the tap.
pub fn grad_tap(x: &Tensor, on_grad: TapFn) -> Tensor {
    if !x.requires_grad() {
        return x.clone();
    }

    Tensor::derived(x.data().clone(), true, |result_grad| {
        Rc::new(GradTapBackward {
            x: x.clone(),
            on_grad,
            result_grad,
        })
    })
}

struct GradTapBackward {
    x: Tensor,
    on_grad: TapFn,
    result_grad: GradCell,
}

impl BackwardOp for GradTapBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            (self.on_grad)(self.x.data(), grad);
            self.x.accumulate_grad(grad.clone());
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.x]
    }
}
