//! Tensor with a shared gradient cell

use super::BackwardOp;
use crate::error::{PruneError, Result};
use ndarray::{ArrayD, IxDyn};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared slot an op writes its result gradient into.
pub type GradCell = Rc<RefCell<Option<ArrayD<f32>>>>;

/// An n-dimensional f32 tensor that records how it was produced.
///
/// Clones share the gradient cell and backward op, so an op can hold a clone
/// of its input and still accumulate into the caller's tensor.
#[derive(Clone)]
pub struct Tensor {
    data: ArrayD<f32>,
    grad: GradCell,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from an array
    pub fn new(data: ArrayD<f32>, requires_grad: bool) -> Self {
        Self {
            data,
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }

    /// Create a 1-D tensor from a vector
    pub fn from_vec(values: Vec<f32>, requires_grad: bool) -> Self {
        let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).unwrap_or_default();
        Self::new(data, requires_grad)
    }

    /// Create a tensor from a flat vector and a shape
    pub fn from_shape_vec(shape: &[usize], values: Vec<f32>, requires_grad: bool) -> Result<Self> {
        let len = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| {
            PruneError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![len],
            }
        })?;
        Ok(Self::new(data, requires_grad))
    }

    /// Result of an op over inputs of which any requires gradients.
    ///
    /// When `requires_grad` holds, `op` is built around the result's gradient
    /// cell and recorded as the producer of the result.
    pub(crate) fn derived(
        data: ArrayD<f32>,
        requires_grad: bool,
        op: impl FnOnce(GradCell) -> Rc<dyn BackwardOp>,
    ) -> Self {
        let mut result = Self::new(data, requires_grad);
        if requires_grad {
            result.backward_op = Some(op(result.grad_cell()));
        }
        result
    }

    /// Create a zero-filled tensor
    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)), false)
    }

    /// Underlying data
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Shape of the data
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether gradients flow into this tensor
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Copy of the accumulated gradient
    pub fn grad(&self) -> Option<ArrayD<f32>> {
        self.grad.borrow().clone()
    }

    /// Shared gradient cell, handed to backward ops of results
    pub fn grad_cell(&self) -> GradCell {
        Rc::clone(&self.grad)
    }

    /// Overwrite the gradient
    pub fn set_grad(&self, grad: ArrayD<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add to the gradient, initializing it on first use
    pub fn accumulate_grad(&self, grad: ArrayD<f32>) {
        let mut cell = self.grad.borrow_mut();
        match cell.as_mut() {
            Some(existing) => *existing += &grad,
            None => *cell = Some(grad),
        }
    }

    /// Drop the accumulated gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Op that produced this tensor
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Record the op that produced this tensor
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .field("has_backward_op", &self.backward_op.is_some())
            .finish()
    }
}
