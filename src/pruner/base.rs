//! State shared by every pruner: the three layer references and the mask

use super::{Mask, MaskSlot, MaskedLayer};
use crate::error::{PruneError, Result};
use crate::nn::{LayerId, LayerKind, Network};
use tracing::debug;

/// Channel, parameter and MAC counts of one pruned convolution.
///
/// "Pruned" counts what the current mask removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerAnalysis {
    pub pruned_channels: usize,
    pub total_channels: usize,
    pub pruned_params: u64,
    pub total_params: u64,
    pub pruned_macs: u64,
    pub total_macs: u64,
}

impl LayerAnalysis {
    /// Fraction of parameters removed
    pub fn param_sparsity(&self) -> f64 {
        ratio(self.pruned_params, self.total_params)
    }

    /// Fraction of multiply-accumulates removed
    pub fn mac_sparsity(&self) -> f64 {
        ratio(self.pruned_macs, self.total_macs)
    }

    /// Sum of several layers
    pub fn total<'a>(layers: impl IntoIterator<Item = &'a LayerAnalysis>) -> LayerAnalysis {
        let mut total = LayerAnalysis::default();
        for l in layers {
            total.pruned_channels += l.pruned_channels;
            total.total_channels += l.total_channels;
            total.pruned_params += l.pruned_params;
            total.total_params += l.total_params;
            total.pruned_macs += l.pruned_macs;
            total.total_macs += l.total_macs;
        }
        total
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// References and mask of one pruned convolution.
#[derive(Debug)]
pub struct PrunerCore {
    pruned_conv: LayerId,
    mask_output: LayerId,
    share_target: Option<LayerId>,
    name: String,
    weight_dims: [usize; 4],
    slot: MaskSlot,
}

impl PrunerCore {
    /// Attach a mask to `mask_output` on behalf of `pruned_conv`.
    ///
    /// Without `share_mask` an all-ones mask sized to the convolution's output
    /// channels is allocated; with it the mask stays unresolved until the
    /// manager's `build()`. A layer that is already masked gets its slot
    /// rebound rather than a second wrapper. When `mask_output` reports a
    /// channel count it must equal the convolution's.
    pub fn install(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let name = net.layer_name(pruned_conv)?.to_string();
        let conv = net.layer(pruned_conv)?;
        if conv.kind() != LayerKind::Conv {
            return Err(PruneError::NotConvolution { layer: name });
        }
        let weight = conv.weight().ok_or_else(|| PruneError::NotConvolution {
            layer: name.clone(),
        })?;
        let weight_dims = match *weight.shape() {
            [oc, ic, kh, kw] => [oc, ic, kh, kw],
            _ => {
                return Err(PruneError::ShapeMismatch {
                    expected: vec![0, 0, 0, 0],
                    actual: weight.shape().to_vec(),
                })
            }
        };
        let output_name = net.layer_name(mask_output)?.to_string();
        if let Some(channels) = net.layer(mask_output)?.out_channels() {
            if channels != weight_dims[0] {
                return Err(PruneError::ShapeMismatch {
                    expected: vec![weight_dims[0]],
                    actual: vec![channels],
                });
            }
        }
        if let Some(target) = share_mask {
            net.layer(target)?;
        }

        let slot = match share_mask {
            Some(_) => MaskSlot::pending(),
            None => MaskSlot::owned(Mask::ones(weight_dims[0])),
        };

        let rebound = match net.layer_mut(mask_output)?.mask_slot_mut() {
            Some(existing) => {
                *existing = slot.clone();
                true
            }
            None => false,
        };
        if rebound {
            debug!(conv = %name, output = %output_name, "rebinding mask of already masked layer");
        } else {
            let wrapper_slot = slot.clone();
            let wrapper_name = output_name.clone();
            net.wrap_layer(mask_output, move |inner| {
                Box::new(MaskedLayer::new(inner, wrapper_slot, wrapper_name))
            })?;
        }

        debug!(
            conv = %name,
            output = %output_name,
            channels = weight_dims[0],
            shared = share_mask.is_some(),
            "installed channel mask"
        );
        Ok(Self {
            pruned_conv,
            mask_output,
            share_target: share_mask,
            name,
            weight_dims,
            slot,
        })
    }

    /// Convolution whose output channels are pruned
    pub fn pruned_conv(&self) -> LayerId {
        self.pruned_conv
    }

    /// Layer whose output is multiplied by the mask
    pub fn mask_output(&self) -> LayerId {
        self.mask_output
    }

    /// Convolution whose mask this pruner mirrors
    pub fn share_target(&self) -> Option<LayerId> {
        self.share_target
    }

    /// Whether this pruner mirrors another pruner's mask
    pub fn is_shared(&self) -> bool {
        self.share_target.is_some()
    }

    /// Name of the pruned convolution
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output channels of the pruned convolution
    pub fn channels(&self) -> usize {
        self.weight_dims[0]
    }

    /// Weight shape (oc, ic, kh, kw) at installation
    pub fn weight_dims(&self) -> [usize; 4] {
        self.weight_dims
    }

    /// The slot the masked layer reads
    pub fn slot(&self) -> &MaskSlot {
        &self.slot
    }

    /// Current mask (the source's mask for sharing pruners)
    pub fn mask(&self) -> Result<Mask> {
        self.slot
            .resolve()
            .ok_or_else(|| PruneError::UnresolvedShare {
                layer: self.name.clone(),
            })
    }

    /// Install a new mask
    pub fn set_mask(&self, mask: Mask) -> Result<()> {
        if mask.channels() != self.channels() {
            return Err(PruneError::ShapeMismatch {
                expected: vec![self.channels()],
                actual: vec![mask.channels()],
            });
        }
        if !self.slot.replace(mask) {
            return Err(PruneError::SharedMaskMutation {
                layer: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Point this pruner's mask at `source`'s
    pub(crate) fn bind_share(&self, source: &PrunerCore) -> Result<()> {
        if source.channels() != self.channels() {
            return Err(PruneError::ShapeMismatch {
                expected: vec![self.channels()],
                actual: vec![source.channels()],
            });
        }
        self.slot
            .bind(&source.slot)
            .map_err(|_| PruneError::ShareCycle {
                layer: self.name.clone(),
            })
    }

    /// Channel, parameter and MAC counts for an output of `out_size` (h, w)
    pub fn analyse(&self, out_size: (usize, usize)) -> Result<LayerAnalysis> {
        let [oc, ic, kh, kw] = self.weight_dims.map(|d| d as u64);
        let (oh, ow) = (out_size.0 as u64, out_size.1 as u64);
        let pruned = self.mask()?.pruned();

        let per_channel_params = ic * kh * kw;
        let per_channel_macs = oh * ow * per_channel_params;
        Ok(LayerAnalysis {
            pruned_channels: pruned,
            total_channels: self.channels(),
            pruned_params: pruned as u64 * per_channel_params,
            total_params: oc * per_channel_params,
            pruned_macs: pruned as u64 * per_channel_macs,
            total_macs: oc * per_channel_macs,
        })
    }
}
