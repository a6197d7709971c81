//! Building a manager from a declarative configuration

use super::PrunerManager;
use crate::config::{Criterion, ManagerConfig};
use crate::error::{PruneError, Result};
use crate::graph::{activation_after, pair_conv_norm};
use crate::nn::{LayerId, LayerKind, Network};
use crate::pruner::{ChannelPruner, Pruner};
use crate::rank::{
    ApozRankPruner, EntropyRankPruner, GradientWeightRankPruner, L1RankPruner, TaylorRankPruner,
};
use std::collections::HashMap;
use tracing::info;

/// Layers one pruner is attached to.
#[derive(Debug, Clone, Copy)]
struct Placement {
    conv: LayerId,
    mask_output: LayerId,
    observed: LayerId,
    share: Option<LayerId>,
}

fn resolve(net: &Network, name: &str) -> Result<LayerId> {
    net.find_layer(name)
        .ok_or_else(|| PruneError::UnknownLayer {
            layer: name.to_string(),
        })
}

fn instantiate(
    net: &mut Network,
    criterion: Criterion,
    at: Placement,
) -> Result<Box<dyn Pruner>> {
    let Placement {
        conv,
        mask_output,
        observed,
        share,
    } = at;
    Ok(match criterion {
        Criterion::L1 => Box::new(L1RankPruner::new(net, conv, mask_output, share)?),
        Criterion::Apoz => {
            let pruner = ApozRankPruner::new(net, conv, mask_output, observed, share)?;
            Box::new(pruner)
        }
        Criterion::Entropy => {
            let pruner = EntropyRankPruner::new(net, conv, mask_output, observed, share)?;
            Box::new(pruner)
        }
        Criterion::Taylor => Box::new(TaylorRankPruner::new(net, conv, mask_output, share)?),
        Criterion::GradientWeight => {
            let pruner = GradientWeightRankPruner::new(net, conv, mask_output, share)?;
            Box::new(pruner)
        }
        Criterion::Manual => Box::new(ChannelPruner::new(net, conv, mask_output, share)?),
    })
}

impl PrunerManager {
    /// Attach a pruner of the configured criterion to every convolution.
    ///
    /// Each convolution not excluded gets one pruner. Its mask sits on the
    /// normalization paired with it (or on the convolution when unpaired), and
    /// activation criteria observe the activation right after the mask when
    /// there is one. Share relations are given by layer name and resolved by
    /// `build()`.
    pub fn from_config(net: &mut Network, config: &ManagerConfig) -> Result<Self> {
        config.args().validate()?;
        let exclude = config
            .excluded()
            .iter()
            .map(|name| resolve(net, name))
            .collect::<Result<Vec<_>>>()?;
        let pairs = pair_conv_norm(net, &exclude)?;

        let mut shares = HashMap::new();
        for (layer, source) in config.shares() {
            let id = resolve(net, layer)?;
            if net.layer(id)?.kind() != LayerKind::Conv {
                return Err(PruneError::NotConvolution {
                    layer: layer.clone(),
                });
            }
            shares.insert(id, resolve(net, source)?);
        }

        let mut placements = Vec::new();
        for conv in net.layers_of_kind(LayerKind::Conv) {
            if exclude.contains(&conv) {
                continue;
            }
            let mask_output = pairs.get_right(&conv).copied().unwrap_or(conv);
            let observed = activation_after(net, mask_output)?.unwrap_or(mask_output);
            placements.push(Placement {
                conv,
                mask_output,
                observed,
                share: shares.get(&conv).copied(),
            });
        }

        let mut manager = Self::new();
        for placement in placements {
            manager.add_boxed(instantiate(net, config.criterion(), placement)?);
        }
        let criterion = config.criterion();
        info!(
            criterion = criterion.display_name(),
            needs_calibration = criterion.requires_calibration(),
            needs_gradient = criterion.requires_gradient(),
            pruners = manager.len(),
            paired = pairs.len(),
            "pruner manager configured"
        );
        Ok(manager)
    }
}
