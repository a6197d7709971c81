//! Reverse-mode traversal over recorded ops

use super::Tensor;
use ndarray::ArrayD;
use std::collections::HashSet;
use std::rc::Rc;

/// Gradient rule of one recorded operation.
pub trait BackwardOp {
    /// Push the result gradient of this op into its inputs.
    fn backward(&self);

    /// Tensors this op propagates into.
    fn inputs(&self) -> Vec<&Tensor>;
}

fn op_key(op: &Rc<dyn BackwardOp>) -> usize {
    Rc::as_ptr(op) as *const () as usize
}

/// Perform the backward pass from `tensor`.
///
/// Every reachable op runs once, after all ops that consume its result, so
/// tensors with several consumers (residual connections) receive the full
/// gradient before it is propagated further.
pub fn backward(tensor: &mut Tensor, grad_output: Option<ArrayD<f32>>) {
    let seed = grad_output.unwrap_or_else(|| ArrayD::ones(tensor.data().raw_dim()));
    tensor.set_grad(seed);

    let Some(root) = tensor.backward_op() else {
        return;
    };

    // Iterative post-order DFS; reversing it yields a topological order.
    let mut order: Vec<Rc<dyn BackwardOp>> = Vec::new();
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack: Vec<(Rc<dyn BackwardOp>, bool)> = vec![(root, false)];

    while let Some((op, expanded)) = stack.pop() {
        if expanded {
            order.push(op);
            continue;
        }
        if !visited.insert(op_key(&op)) {
            continue;
        }
        let children: Vec<Rc<dyn BackwardOp>> =
            op.inputs().iter().filter_map(|t| t.backward_op()).collect();
        stack.push((op, true));
        for child in children {
            if !visited.contains(&op_key(&child)) {
                stack.push((child, false));
            }
        }
    }

    for op in order.iter().rev() {
        op.backward();
    }
}
