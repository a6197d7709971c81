//! Ranking by gradient saliency (Taylor expansion and weight times gradient)

use super::stats::HookState;
use super::{
    conv_weight, ensure_owner, filter_mean, install, keep_highest, spatial_means, SampleHistory,
};
use crate::config::{validate_fraction, Criterion, PruneArgs};
use crate::error::{PruneError, Result};
use crate::nn::{HookHandle, LayerId, Network};
use crate::pruner::{Pruner, PrunerCore};
use ndarray::{Array1, ArrayD, Axis};
use std::cell::RefCell;
use std::rc::Rc;

/// First-order Taylor ranking.
///
/// A backward hook on the pruned convolution records, per sample, the spatial
/// mean of `y * dy` for every output channel. The score of a channel is the
/// absolute value of the mean over all recorded samples.
#[derive(Debug)]
pub struct TaylorRankPruner {
    core: PrunerCore,
    state: Rc<RefCell<HookState<SampleHistory>>>,
    hook: Option<HookHandle>,
}

fn push_taylor(
    history: &mut SampleHistory,
    output: &ArrayD<f32>,
    grad_output: &ArrayD<f32>,
) -> Result<()> {
    if output.shape() != grad_output.shape() {
        return Err(PruneError::ShapeMismatch {
            expected: output.shape().to_vec(),
            actual: grad_output.shape().to_vec(),
        });
    }
    history.accumulate(spatial_means(&(output * grad_output))?)
}

impl TaylorRankPruner {
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        let history = SampleHistory::new(core.channels());
        let state = Rc::new(RefCell::new(HookState::new(history)));
        if core.is_shared() {
            return Ok(Self {
                core,
                state,
                hook: None,
            });
        }

        let sink = Rc::downgrade(&state);
        let layer = core.name().to_string();
        let hook = net.register_backward_hook(pruned_conv, move |event| {
            if event.training {
                return;
            }
            let Some(state) = sink.upgrade() else {
                return;
            };
            let mut state = state.borrow_mut();
            let outcome = push_taylor(&mut state.stats, event.output, event.grad_output);
            state.record(&layer, outcome);
        })?;
        Ok(Self {
            core,
            state,
            hook: Some(hook),
        })
    }

    /// Samples recorded since the last prune or clear
    pub fn samples(&self) -> usize {
        self.state.borrow().stats.rows()
    }

    /// Record an output and its gradient by hand
    pub fn accumulate(&self, output: &ArrayD<f32>, grad_output: &ArrayD<f32>) -> Result<()> {
        push_taylor(&mut self.state.borrow_mut().stats, output, grad_output)
    }

    /// Prune the `fraction` of channels with the smallest Taylor score
    pub fn prune_by_percent(&mut self, fraction: f64) -> Result<()> {
        validate_fraction(fraction)?;
        ensure_owner(&self.core)?;
        let rows = {
            let mut state = self.state.borrow_mut();
            state.take_fault()?;
            state.stats.consume(self.core.name())?
        };
        let scores = rows
            .mean_axis(Axis(0))
            .ok_or_else(|| PruneError::EmptyStatistics {
                layer: self.core.name().to_string(),
            })?
            .mapv(f32::abs);
        let mask = keep_highest(&scores, fraction)?;
        install(&self.core, mask, Criterion::Taylor)
    }
}

impl Pruner for TaylorRankPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::Taylor
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
        self.hook.is_some_and(|handle| net.remove_hook(handle))
    }
}

/// Ranking by `|mean(w * dw)|` over each filter.
///
/// Reads the weight gradient left by the most recent backward pass.
#[derive(Debug)]
pub struct GradientWeightRankPruner {
    core: PrunerCore,
}

impl GradientWeightRankPruner {
    pub fn new(
        net: &mut Network,
        pruned_conv: LayerId,
        mask_output: LayerId,
        share_mask: Option<LayerId>,
    ) -> Result<Self> {
        let core = PrunerCore::install(net, pruned_conv, mask_output, share_mask)?;
        Ok(Self { core })
    }

    /// `|mean(w * dw)|` per output channel
    pub fn scores(&self, net: &Network) -> Result<Array1<f32>> {
        let weight = conv_weight(net, &self.core)?;
        let grad = weight.grad().ok_or_else(|| PruneError::MissingGradient {
            layer: self.core.name().to_string(),
        })?;
        if grad.shape() != weight.shape() {
            return Err(PruneError::ShapeMismatch {
                expected: weight.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }
        Ok(filter_mean(&(weight.data() * &grad)).mapv(f32::abs))
    }

    /// Prune the `fraction` of channels with the smallest score
    pub fn prune_by_percent(&mut self, net: &Network, fraction: f64) -> Result<()> {
        validate_fraction(fraction)?;
        ensure_owner(&self.core)?;
        let mask = keep_highest(&self.scores(net)?, fraction)?;
        install(&self.core, mask, Criterion::GradientWeight)
    }
}

impl Pruner for GradientWeightRankPruner {
    fn core(&self) -> &PrunerCore {
        &self.core
    }

    fn criterion(&self) -> Criterion {
        Criterion::GradientWeight
    }

    fn default_prune(&mut self, net: &Network, args: &PruneArgs) -> Result<()> {
        self.prune_by_percent(net, args.percent())
    }
}
