//! Autograd operations with backward passes

mod activations;
mod basic;
mod conv;
mod mask;
mod normalize;
mod tap;

pub use activations::relu;
pub use basic::{add, mul, sum};
pub use conv::{conv2d, ConvGeometry};
pub use mask::channel_mask;
pub(crate) use mask::broadcast_channels;
pub use normalize::batch_norm;
pub use tap::{grad_tap, TapFn};
