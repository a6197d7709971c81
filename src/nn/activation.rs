//! Parameter-free layers

use super::{Layer, LayerKind};
use crate::autograd::{relu, Context, Tensor};
use crate::error::Result;

/// Rectified linear unit
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl Layer for Relu {
    fn forward(&self, x: &Tensor, _ctx: &Context) -> Result<Tensor> {
        Ok(relu(x))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }
}

/// Pass-through layer
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Layer for Identity {
    fn forward(&self, x: &Tensor, _ctx: &Context) -> Result<Tensor> {
        Ok(x.clone())
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Other
    }
}
