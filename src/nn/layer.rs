//! The layer contract the pruning engine works against

use crate::autograd::{Context, Tensor};
use crate::error::Result;
use crate::pruner::MaskSlot;

/// Coarse role of a layer in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Convolution owning prunable output channels
    Conv,
    /// Per-channel normalization
    Norm,
    /// Element-wise activation
    Activation,
    /// Anything else
    Other,
}

/// Anything invocable with a tensor in and a tensor out.
pub trait Layer {
    /// Run the layer on `x`
    fn forward(&self, x: &Tensor, ctx: &Context) -> Result<Tensor>;

    /// Role of the layer
    fn kind(&self) -> LayerKind;

    /// Weight tensor, for layers that have one
    fn weight(&self) -> Option<&Tensor> {
        None
    }

    /// Number of output channels, when fixed by the layer
    fn out_channels(&self) -> Option<usize> {
        None
    }

    /// Mask slot read on every forward, when the output is masked
    fn mask_slot(&self) -> Option<&MaskSlot> {
        None
    }

    /// Mutable access to the mask slot, for rebinding
    fn mask_slot_mut(&mut self) -> Option<&mut MaskSlot> {
        None
    }
}
