//! Channel ranking strategies
//!
//! | Pruner | Default rule | Statistic |
//! |---|---|---|
//! | [`L1RankPruner`] | keep `mean|w| >= std(w) * s` | none |
//! | [`ApozRankPruner`] | prune the highest-APoZ fraction | EMA of zero fractions |
//! | [`EntropyRankPruner`] | prune the lowest-entropy fraction | per-sample channel means |
//! | [`TaylorRankPruner`] | prune the lowest `|mean(y * dy)|` fraction | per-sample `y * dy` |
//! | [`GradientWeightRankPruner`] | prune the lowest `|mean(w * dw)|` fraction | none |
//!
//! Activation and Taylor statistics are only gathered from passes run in
//! evaluation mode; training passes leave them untouched.

mod activation;
mod gradient;
mod select;
mod stats;
mod weight;


pub use activation::{ApozRankPruner, EntropyRankPruner};
pub use gradient::{GradientWeightRankPruner, TaylorRankPruner};
pub use select::{keep_at_least, keep_highest, keep_lowest};
pub use stats::{
    channel_entropy, spatial_means, zero_fraction, ApozAccumulator, SampleHistory, APOZ_DECAY,
};
pub use weight::L1RankPruner;

use crate::autograd::Tensor;
use crate::config::Criterion;
use crate::error::{PruneError, Result};
use crate::nn::Network;
use crate::pruner::{Mask, PrunerCore};
use ndarray::{Array1, ArrayD, Axis};
use tracing::info;

/// Weight tensor of the pruned convolution, checked against the installed shape
fn conv_weight<'a>(net: &'a Network, core: &PrunerCore) -> Result<&'a Tensor> {
    let weight = net
        .layer(core.pruned_conv())?
        .weight()
        .ok_or_else(|| PruneError::NotConvolution {
            layer: core.name().to_string(),
        })?;
    if weight.shape() != core.weight_dims() {
        return Err(PruneError::ShapeMismatch {
            expected: core.weight_dims().to_vec(),
            actual: weight.shape().to_vec(),
        });
    }
    Ok(weight)
}

/// Mean over every axis but the first: one value per output channel
fn filter_mean(values: &ArrayD<f32>) -> Array1<f32> {
    let channels = values.shape().first().copied().unwrap_or(0);
    let per_filter = values.len().checked_div(channels).unwrap_or(0).max(1) as f32;
    let mut sums = Array1::<f32>::zeros(channels);
    for (c, filter) in values.axis_iter(Axis(0)).enumerate() {
        sums[c] = filter.sum() / per_filter;
    }
    sums
}

/// Fail before consuming statistics if this pruner cannot own a mask
fn ensure_owner(core: &PrunerCore) -> Result<()> {
    if core.is_shared() {
        return Err(PruneError::SharedMaskMutation {
            layer: core.name().to_string(),
        });
    }
    Ok(())
}

fn install(core: &PrunerCore, mask: Mask, criterion: Criterion) -> Result<()> {
    let (kept, total) = (mask.kept(), mask.channels());
    core.set_mask(mask)?;
    info!(
        layer = core.name(),
        criterion = criterion.display_name(),
        kept,
        total,
        "installed pruning mask"
    );
    Ok(())
}
