//! Element-wise arithmetic and reduction

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{PruneError, Result};
use ndarray::{arr0, ArrayD};
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
enum Elementwise {
    Add,
    Mul,
}

fn elementwise(kind: Elementwise, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.shape() != b.shape() {
        return Err(PruneError::ShapeMismatch {
            expected: a.shape().to_vec(),
            actual: b.shape().to_vec(),
        });
    }
    let data = match kind {
        Elementwise::Add => a.data() + b.data(),
        Elementwise::Mul => a.data() * b.data(),
    };
    let requires_grad = a.requires_grad() || b.requires_grad();
    Ok(Tensor::derived(data, requires_grad, |result_grad| {
        Rc::new(ElementwiseBackward {
            kind,
            a: a.clone(),
            b: b.clone(),
            result_grad,
        })
    }))
}

/// Sum of two tensors of identical shape; residual connections use it
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    elementwise(Elementwise::Add, a, b)
}

/// Element-wise product of two tensors of identical shape
pub fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    elementwise(Elementwise::Mul, a, b)
}

struct ElementwiseBackward {
    kind: Elementwise,
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ElementwiseBackward {
    fn backward(&self) {
        let cell = self.result_grad.borrow();
        let Some(grad) = cell.as_ref() else {
            return;
        };
        // d(a + b) passes the gradient through; d(a * b) scales it by the other factor
        let (grad_a, grad_b) = match self.kind {
            Elementwise::Add => (grad.clone(), grad.clone()),
            Elementwise::Mul => (grad * self.b.data(), grad * self.a.data()),
        };
        if self.a.requires_grad() {
            self.a.accumulate_grad(grad_a);
        }
        if self.b.requires_grad() {
            self.b.accumulate_grad(grad_b);
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a, &self.b]
    }
}

/// Reduce to a 0-d tensor holding the sum of every element
pub fn sum(a: &Tensor) -> Tensor {
    let data = arr0(a.data().sum()).into_dyn();
    Tensor::derived(data, a.requires_grad(), |result_grad| {
        Rc::new(SumBackward {
            a: a.clone(),
            result_grad,
        })
    })
}

struct SumBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SumBackward {
    fn backward(&self) {
        let seed = self
            .result_grad
            .borrow()
            .as_ref()
            .and_then(|g| g.iter().next().copied());
        if let Some(g) = seed.filter(|_| self.a.requires_grad()) {
            let grad = ArrayD::from_elem(self.a.data().raw_dim(), g);
            self.a.accumulate_grad(grad);
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a]
    }
}
