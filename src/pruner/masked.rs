//! Layer wrapper that multiplies its output by a channel mask

use super::MaskSlot;
use crate::autograd::{channel_mask, Context, Tensor};
use crate::error::{PruneError, Result};
use crate::nn::{Layer, LayerKind};

/// Runs the wrapped layer, then zeroes the pruned channels of its output.
///
/// The mask is read from the slot on every call, so installing a new mask
/// (or resolving a share) takes effect on the next forward pass.
pub struct MaskedLayer {
    inner: Box<dyn Layer>,
    slot: MaskSlot,
    name: String,
}

impl MaskedLayer {
    pub fn new(inner: Box<dyn Layer>, slot: MaskSlot, name: impl Into<String>) -> Self {
        Self {
            inner,
            slot,
            name: name.into(),
        }
    }
}

impl Layer for MaskedLayer {
    fn forward(&self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        let out = self.inner.forward(x, ctx)?;
        self.slot
            .with_mask(|mask| channel_mask(&out, mask.values()))
            .ok_or_else(|| PruneError::UnresolvedShare {
                layer: self.name.clone(),
            })?
    }

    fn kind(&self) -> LayerKind {
        self.inner.kind()
    }

    fn weight(&self) -> Option<&Tensor> {
        self.inner.weight()
    }

    fn out_channels(&self) -> Option<usize> {
        self.inner.out_channels()
    }

    fn mask_slot(&self) -> Option<&MaskSlot> {
        Some(&self.slot)
    }

    fn mask_slot_mut(&mut self) -> Option<&mut MaskSlot> {
        Some(&mut self.slot)
    }
}
