//! Ranking by activation statistics (APoZ and entropy)

use super::stats::HookState;
use super::{
    channel_entropy, ensure_owner, install, keep_highest, keep_lowest, spatial_means,
    ApozAccumulator, SampleHistory,
};
use crate::config::{validate_fraction, Criterion, PruneArgs};
use crate::error::{PruneError, Result};
use crate::nn::{HookHandle, LayerId, Network};
use crate::pruner::{Pruner, PrunerCore};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::rc::Rc;

/// Forward hook on `observed` feeding evaluation-mode outputs to `feed`.
///
/// Pruners mirroring another mask never rank, so they get no hook. The hook
/// holds the state weakly and does nothing once the pruner is dropped.
fn attach<A: 'static>(
    net: &Network,
    core: &PrunerCore,
    observed: LayerId,
    state: &Rc<RefCell<HookState<A>>>,
    feed: fn(&mut A, &ArrayD<f32>) -> Result<()>,
) -> Result<Option<HookHandle>> {
    if core.is_shared() {
        return Ok(None);
    }
    let sink = Rc::downgrade(state);
    let layer = core.name().to_string();
    let handle = net.register_forward_hook(observed, move |event| {
        if event.training {
            return;
        }
        let Some(state) = sink.upgrade() else {
            return;
        };
        let mut state = state.borrow_mut();
        let outcome = feed(&mut state.stats, event.output.data());
        state.record(&layer, outcome);
    })?;
    Ok(Some(handle))
}

fn detach_hook(net: &Network, hook: Option<HookHandle>) -> bool {
    hook.is_some_and(|handle| net.remove_hook(handle))
}

/// Average Percentage of Zeros ranking.
///
/// A forward hook on the observed activation blends the zero fraction of each
/// evaluation batch into a moving average. Channels that are zero most often
/// are pruned first.
#[derive(Debug)]
pub struct ApozRankPruner {
    core: PrunerCore,
    observed: LayerId,
    state: Rc<RefCell<HookState<ApozAccumulator>>>,
    hook: Option<HookHandle>,
}

impl ApozRankPruner {
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        observed: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        let accumulator = ApozAccumulator::new(core.channels());
        let state = Rc::new(RefCell::new(HookState::new(accumulator)));
        let feed = ApozAccumulator::accumulate_activation;
        let hook = attach(net, &core, observed, &state, feed)?;
        Ok(Self {
            core,
            observed,
            state,
            hook,
        })
    }

    /// Layer whose output is observed
    pub fn observed(&self) -> LayerId {
        self.observed
    }

    /// Batches blended since the last prune or clear
    pub fn batches(&self) -> usize {
        self.state.borrow().stats.batches()
    }

    /// Current moving average
    pub fn apoz(&self) -> ndarray::Array1<f32> {
        self.state.borrow().stats.apoz().clone()
    }

    /// Blend an (N, C, H, W) activation by hand
    pub fn accumulate(&self, activation: &ArrayD<f32>) -> Result<()> {
        self.state
            .borrow_mut()
            .stats
            .accumulate_activation(activation)
    }

    /// Prune the `fraction` of channels with the highest APoZ
    pub fn prune_by_percent(&mut self, fraction: f64) -> Result<()> {
        validate_fraction(fraction)?;
        ensure_owner(&self.core)?;
        let apoz = {
            let mut state = self.state.borrow_mut();
            state.take_fault()?;
            state.stats.consume(self.core.name())?
        };
        let mask = keep_lowest(&apoz, fraction)?;
        install(&self.core, mask, Criterion::Apoz)
    }
}

impl Pruner for ApozRankPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::Apoz
    }

    fn default_prune(&mut self, _net: &Network, args: &PruneArgs) -> Result<()> {
        self.prune_by_percent(args.percent())
    }

    fn clear_state(&mut self) {
        let mut state = self.state.borrow_mut();
        state.stats.clear();
        let _ = state.take_fault();
    }

    fn detach(&self, net: &Network) -> bool {
        detach_hook(net, self.hook)
    }
}

/// Entropy ranking.
///
/// Keeps the spatial mean of every channel for every evaluation sample and
/// ranks channels by the entropy of those means: a channel whose mean barely
/// varies carries little information and is pruned first.
#[derive(Debug)]
pub struct EntropyRankPruner {
    core: PrunerCore,
    observed: LayerId,
    state: Rc<RefCell<HookState<SampleHistory>>>,
    hook: Option<HookHandle>,
}

fn push_means(history: &mut SampleHistory, activation: &ArrayD<f32>) -> Result<()> {
    history.accumulate(spatial_means(activation)?)
}

impl EntropyRankPruner {
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        observed: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        let history = SampleHistory::new(core.channels());
        let state = Rc::new(RefCell::new(HookState::new(history)));
        let hook = attach(net, &core, observed, &state, push_means)?;
        Ok(Self {
            core,
            observed,
            state,
            hook,
        })
    }

    /// Layer whose output is observed
    pub fn observed(&self) -> LayerId {
        self.observed
    }

    /// Samples recorded since the last prune or clear
    pub fn samples(&self) -> usize {
        self.state.borrow().stats.rows()
    }

    /// Record an (N, C, H, W) activation by hand
    pub fn accumulate(&self, activation: &ArrayD<f32>) -> Result<()> {
        push_means(&mut self.state.borrow_mut().stats, activation)
    }

    /// Prune the `fraction` of channels with the lowest entropy over `bins` bins
    pub fn prune_by_percent(&mut self, fraction: f64, bins: usize) -> Result<()> {
        validate_fraction(fraction)?;
        if bins == 0 {
            return Err(PruneError::InvalidBins { value: bins });
        }
        ensure_owner(&self.core)?;
        let rows = {
            let mut state = self.state.borrow_mut();
            state.take_fault()?;
            state.stats.consume(self.core.name())?
        };
        let entropy = channel_entropy(&rows, bins)?;
        let mask = keep_highest(&entropy, fraction)?;
        install(&self.core, mask, Criterion::Entropy)
    }
}

impl Pruner for EntropyRankPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::Entropy
    }

    fn default_prune(&mut self, _net: &Network, args: &PruneArgs) -> Result<()> {
        self.prune_by_percent(args.percent(), args.bins())
    }

    fn clear_state(&mut self) {
        let mut state = self.state.borrow_mut();
        state.stats.clear();
        let _ = state.take_fault();
    }

    fn detach(&self, net: &Network) -> bool {
        detach_hook(net, self.hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{ConvGeometry, Context, Tensor};
    use crate::nn::{Conv2d, NodeInput, Relu};

    #[test]
    fn test_dropped_pruner_state_is_released() {
        let mut net = Network::new();
        let weight = Tensor::from_shape_vec(&[2, 1, 1, 1], vec![1.0, -1.0], true).unwrap();
        let geometry = ConvGeometry {
            stride: 1,
            padding: 0,
        };
        let conv = Conv2d::new(weight, geometry).unwrap();
        let conv = net.add_layer("conv", conv).unwrap();
        let relu = net.add_layer("relu", Relu).unwrap();
        net.sequential(NodeInput::Data, &[conv, relu]).unwrap();

        let pruner = EntropyRankPruner::new(&mut net, conv, conv, relu, None).unwrap();
        let state = Rc::downgrade(&pruner.state);
        drop(pruner);

        let x = Tensor::from_shape_vec(&[1, 1, 1, 1], vec![1.0], false).unwrap();
        for _ in 0..3 {
            net.forward(&x, &Context::evaluation()).unwrap();
        }
        assert!(
            state.upgrade().is_none(),
            "the network must not keep statistics of a dropped pruner alive"
        );
    }
}
