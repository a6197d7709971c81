//! Tape-based autograd engine
//!
//! Tensors record the op that produced them; [`backward`] walks those ops in
//! reverse topological order. The engine covers what channel pruning needs:
//! convolutions, normalization, activations, residual sums, the channel mask
//! and gradient taps used by gradient-based ranking.

mod backward;
mod context;
mod ops;
mod tensor;


pub use backward::{backward, BackwardOp};
pub use context::{Context, Mode};
pub use ops::*;
pub use tensor::{GradCell, Tensor};
