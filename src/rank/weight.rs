//! Ranking by filter weight magnitude

use super::{conv_weight, ensure_owner, filter_mean, install, keep_at_least, keep_highest};
use crate::config::{Criterion, PruneArgs};
use crate::error::Result;
use crate::nn::{LayerId, Network};
use crate::pruner::{Pruner, PrunerCore};
use ndarray::Array1;
use tracing::debug;

/// Keeps filters with large mean absolute weight. No statistics needed.
#[derive(Debug)]
pub struct L1RankPruner {
    core: PrunerCore,
}

impl L1RankPruner {
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        Ok(Self { core })
    }

    /// `mean(|w|)` over (in_channel, kh, kw) per output channel
    pub fn scores(&self, net: &Network) -> Result<Array1<f32>> {
        let weight = conv_weight(net, &self.core)?;
        Ok(filter_mean(&weight.data().mapv(f32::abs)))
    }

    /// Keep channels with `mean(|w|) >= std(w) * sensitivity`.
    ///
    /// `std` is the population standard deviation over every weight element.
    pub fn prune_by_std(&mut self, net: &Network, sensitivity: f32) -> Result<()> {
        ensure_owner(&self.core)?;
        let weight = conv_weight(net, &self.core)?;
        let threshold = weight.data().std(0.0) * sensitivity;
        debug!(layer = self.core.name(), threshold, "L1 std threshold");
        let mask = keep_at_least(&self.scores(net)?, threshold);
        install(&self.core, mask, Criterion::L1)
    }

    /// Prune the `fraction` of channels with the smallest `mean(|w|)`
    pub fn prune_by_percent(&mut self, net: &Network, fraction: f64) -> Result<()> {
        ensure_owner(&self.core)?;
        let mask = keep_highest(&self.scores(net)?, fraction)?;
        install(&self.core, mask, Criterion::L1)
    }
}

impl Pruner for L1RankPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::L1
    }

    fn default_prune(&mut self, net: &Network, args: &PruneArgs) -> Result<()> {
        self.prune_by_std(net, args.sensitivity())
    }
}
