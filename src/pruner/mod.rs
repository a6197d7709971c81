//! Per-convolution pruners
//!
//! A pruner binds three layers of a [`Network`]: the convolution whose output
//! channels are pruned, the layer whose output is masked (the convolution
//! itself or the normalization after it), and optionally another convolution
//! whose mask it mirrors. Ranking strategies in [`crate::rank`] build on
//! [`PrunerCore`] and differ only in how they compute a new mask.

mod base;
mod mask;
mod masked;

#[cfg(test)]
mod tests;

pub use base::{LayerAnalysis, PrunerCore};
pub use mask::{Mask, MaskSlot};
pub use masked::MaskedLayer;

use crate::config::{Criterion, PruneArgs};
use crate::error::{PruneError, Result};
use crate::nn::{LayerId, Network};

/// A pruner with a ranking strategy.
pub trait Pruner {
    /// References and mask
    fn core(&self) -> &PrunerCore;

    /// Ranking criterion implemented by this pruner
    fn criterion(&self) -> Criterion;

    /// Recompute the mask with the strategy's default rule
    fn default_prune(&mut self, net: &Network, args: &PruneArgs) -> Result<()>;

    /// Drop accumulated statistics
    fn clear_state(&mut self) {}

    /// Remove the statistics hook from `net`; returns whether one was attached
    fn detach(&self, _net: &Network) -> bool {
        false
    }

    /// Counts for an output of `out_size` (h, w)
    fn analyse(&self, out_size: (usize, usize)) -> Result<LayerAnalysis> {
        self.core().analyse(out_size)
    }
}

/// Pruner without a ranking strategy; masks are set by hand.
#[derive(Debug)]
pub struct ChannelPruner {
    core: PrunerCore,
}

impl ChannelPruner {
    /// Install a mask for `pruned_conv` on `mask_output`
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        Ok(Self { core })
    }

    /// Install a mask directly on the convolution's output
    pub fn on_conv(net: &mut Network, conv: LayerId) -> Result<Self> {
        Self::new(net, conv, conv, None)
    }
}

impl Pruner for ChannelPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::Manual
    }

    fn default_prune(&mut self, _net: &Network, _args: &PruneArgs) -> Result<()> {
        Err(PruneError::Unimplemented {
            layer: self.core.name().to_string(),
        })
    }
}
