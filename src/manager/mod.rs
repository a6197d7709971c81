//! Coordination of many pruners over one network
//!
//! The manager owns the pruners of a network, resolves which of them mirror
//! another pruner's mask, infers every masked layer's output size with one
//! sizing pass, and aggregates parameter and MAC sparsity.

mod setup;


use crate::autograd::{Context, Tensor};
use crate::config::PruneArgs;
use crate::error::{PruneError, Result};
use crate::nn::{LayerId, Network};
use crate::pruner::{LayerAnalysis, Pruner};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

/// Ordered collection of pruners plus the output sizes found by `build`.
#[derive(Default)]
pub struct PrunerManager {
    pruners: Vec<Box<dyn Pruner>>,
    out_sizes: Option<Vec<(usize, usize)>>,
}

impl PrunerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pruner
    pub fn add(&mut self, pruner: impl Pruner + 'static) {
        self.add_boxed(Box::new(pruner));
    }

    /// Append an already boxed pruner
    pub fn add_boxed(&mut self, pruner: Box<dyn Pruner>) {
        self.pruners.push(pruner);
        self.out_sizes = None;
    }

    /// Append several pruners, keeping their order
    pub fn compose(&mut self, pruners: impl IntoIterator<Item = Box<dyn Pruner>>) {
        self.pruners.extend(pruners);
        self.out_sizes = None;
    }

    pub fn len(&self) -> usize {
        self.pruners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pruners.is_empty()
    }

    /// Pruners in registration order
    pub fn pruners(&self) -> &[Box<dyn Pruner>] {
        &self.pruners
    }

    /// Whether output sizes are known for every pruner
    pub fn is_built(&self) -> bool {
        self.out_sizes.is_some()
    }

    /// Output (height, width) of the `index`-th pruner's masked layer
    pub fn out_size(&self, index: usize) -> Option<(usize, usize)> {
        self.out_sizes
            .as_ref()
            .and_then(|sizes| sizes.get(index).copied())
    }

    /// Resolve mask sharing and infer output sizes from an input of `in_shape`.
    ///
    /// The sizing pass runs with a training-mode context so statistics hooks
    /// ignore it, and its hooks are detached before this returns.
    pub fn build(&mut self, net: &Network, in_shape: [usize; 4]) -> Result<()> {
        if self.pruners.is_empty() {
            return Err(PruneError::NoPruners);
        }
        self.out_sizes = None;
        self.resolve_shares(net)?;
        self.out_sizes = Some(self.measure_out_sizes(net, in_shape)?);
        info!(pruners = self.pruners.len(), ?in_shape, "pruner manager built");
        Ok(())
    }

    fn resolve_shares(&self, net: &Network) -> Result<()> {
        // Later pruners of the same convolution win
        let by_conv: HashMap<LayerId, usize> = self
            .pruners
            .iter()
            .enumerate()
            .map(|(i, p)| (p.core().pruned_conv(), i))
            .collect();

        for pruner in &self.pruners {
            let core = pruner.core();
            let Some(target) = core.share_target() else {
                continue;
            };
            let source = by_conv
                .get(&target)
                .map(|&i| self.pruners[i].core())
                .ok_or_else(|| PruneError::UnknownShareTarget {
                    layer: core.name().to_string(),
                    target: net.display_name(target),
                })?;
            if std::ptr::eq(source, core) {
                return Err(PruneError::ShareCycle {
                    layer: core.name().to_string(),
                });
            }
            core.bind_share(source)?;
            debug!(
                layer = core.name(),
                source = source.name(),
                "resolved shared mask"
            );
        }
        Ok(())
    }

    fn measure_out_sizes(
        &self,
        net: &Network,
        in_shape: [usize; 4],
    ) -> Result<Vec<(usize, usize)>> {
        let sizes: Rc<RefCell<Vec<Option<(usize, usize)>>>> =
            Rc::new(RefCell::new(vec![None; self.pruners.len()]));

        let mut guards = Vec::with_capacity(self.pruners.len());
        for (i, pruner) in self.pruners.iter().enumerate() {
            let sink = Rc::clone(&sizes);
            let layer = pruner.core().mask_output();
            guards.push(net.scoped_forward_hook(layer, move |event| {
                if let [_, _, h, w] = *event.output.shape() {
                    sink.borrow_mut()[i] = Some((h, w));
                }
            })?);
        }
        let outcome = net.forward(&Tensor::zeros(&in_shape), &Context::new());
        drop(guards);
        outcome?;

        let sizes = sizes.borrow();
        self.pruners
            .iter()
            .zip(sizes.iter())
            .map(|(pruner, size)| {
                size.ok_or_else(|| {
                    let layer = net.display_name(pruner.core().mask_output());
                    PruneError::UnknownLayer {
                        layer: format!("{layer} (not reached by the sizing pass)"),
                    }
                })
            })
            .collect()
    }

    /// Call `f` on every pruner in registration order
    pub fn apply(&mut self, mut f: impl FnMut(&mut dyn Pruner)) {
        for pruner in &mut self.pruners {
            f(pruner.as_mut());
        }
    }

    /// Run every pruner's default rule in registration order.
    ///
    /// Pruners mirroring another mask are skipped: they follow their source.
    /// Their statistics are dropped so nothing piles up between cycles.
    pub fn prune(&mut self, net: &Network, args: &PruneArgs) -> Result<()> {
        args.validate()?;
        for pruner in &mut self.pruners {
            if pruner.core().is_shared() {
                debug!(
                    layer = pruner.core().name(),
                    "skipping pruner with shared mask"
                );
                pruner.clear_state();
                continue;
            }
            pruner.default_prune(net, args)?;
        }
        Ok(())
    }

    /// Drop accumulated statistics of every pruner
    pub fn clear_state(&mut self) {
        self.apply(|pruner| pruner.clear_state());
    }

    /// Remove every pruner's statistics hook from `net`; returns how many were removed.
    ///
    /// Masks stay installed, so the network keeps its pruned channels.
    pub fn detach(&self, net: &Network) -> usize {
        let removed = self
            .pruners
            .iter()
            .filter(|pruner| pruner.detach(net))
            .count();
        debug!(removed, "statistics hooks detached");
        removed
    }

    /// Per-pruner counts, in registration order
    pub fn report(&self) -> Result<Vec<LayerAnalysis>> {
        let sizes = self.out_sizes.as_ref().ok_or(PruneError::NotBuilt)?;
        self.pruners
            .iter()
            .zip(sizes)
            .map(|(pruner, &size)| pruner.analyse(size))
            .collect()
    }

    /// Fractions of parameters and of MACs removed across all pruners
    pub fn analyse(&self) -> Result<(f64, f64)> {
        let total = LayerAnalysis::total(&self.report()?);
        let sparsity = (total.param_sparsity(), total.mac_sparsity());
        info!(
            pruned_params = total.pruned_params,
            total_params = total.total_params,
            param_sparsity = sparsity.0,
            mac_sparsity = sparsity.1,
            "pruning analysis"
        );
        Ok(sparsity)
    }
}

impl fmt::Debug for PrunerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.pruners.iter().map(|p| p.core().name()).collect();
        f.debug_struct("PrunerManager")
            .field("pruners", &names)
            .field("out_sizes", &self.out_sizes)
            .finish()
    }
}
