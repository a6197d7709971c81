//! Pruning configuration
//!
//! Provides the ranking criterion selection, the arguments handed to every
//! pruner's default rule, and the set-up description consumed by
//! [`PrunerManager::from_config`](crate::manager::PrunerManager::from_config).

use crate::error::{PruneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channel ranking criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    /// Mean absolute filter weight against a std-scaled threshold
    #[default]
    L1,

    /// Average percentage of zeros in the activation (lower is better)
    Apoz,

    /// Entropy of per-sample mean activations
    Entropy,

    /// First-order Taylor estimate from activation times gradient
    Taylor,

    /// Filter weight times its gradient
    GradientWeight,

    /// No ranking; masks are set by hand
    Manual,
}

impl Criterion {
    /// Check if this criterion needs evaluation-mode passes before pruning.
    pub fn requires_calibration(&self) -> bool {
        matches!(
            self,
            Criterion::Apoz | Criterion::Entropy | Criterion::Taylor
        )
    }

    /// Check if this criterion reads gradients.
    pub fn requires_gradient(&self) -> bool {
        matches!(self, Criterion::Taylor | Criterion::GradientWeight)
    }

    /// Get the display name for this criterion.
    pub fn display_name(&self) -> &'static str {
        match self {
            Criterion::L1 => "L1",
            Criterion::Apoz => "APoZ",
            Criterion::Entropy => "Entropy",
            Criterion::Taylor => "Taylor",
            Criterion::GradientWeight => "Gradient x Weight",
            Criterion::Manual => "Manual",
        }
    }
}

/// Arguments of the default pruning rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneArgs {
    /// Fraction of channels to prune, in [0, 1].
    percent: f64,

    /// Histogram bins of the entropy criterion.
    bins: usize,

    /// Multiplier of the weight std in the L1 rule.
    sensitivity: f32,
}

impl Default for PruneArgs {
    fn default() -> Self {
        Self {
            percent: 0.5,
            bins: 100,
            sensitivity: 0.25,
        }
    }
}

impl PruneArgs {
    /// Create arguments with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prune fraction.
    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = percent;
        self
    }

    /// Set the number of entropy bins.
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins;
        self
    }

    /// Set the L1 sensitivity.
    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Get the prune fraction.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Get the number of entropy bins.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Get the L1 sensitivity.
    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    /// Validate the arguments.
    pub fn validate(&self) -> Result<()> {
        validate_fraction(self.percent)?;
        if self.bins == 0 {
            return Err(PruneError::InvalidBins { value: self.bins });
        }
        Ok(())
    }
}

/// Reject fractions outside [0, 1] (NaN included).
pub(crate) fn validate_fraction(value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PruneError::InvalidFraction { value })
    }
}

/// Declarative set-up of a [`PrunerManager`](crate::manager::PrunerManager).
///
/// # Example
///
/// ```
/// use podar::config::{Criterion, ManagerConfig, PruneArgs};
///
/// let config = ManagerConfig::new()
///     .with_criterion(Criterion::Apoz)
///     .exclude("stem")
///     .share_mask("stage1.conv2", "stage1.conv0")
///     .with_args(PruneArgs::new().with_percent(0.3));
/// assert_eq!(config.criterion(), Criterion::Apoz);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ranking criterion for every pruned convolution.
    criterion: Criterion,

    /// Layers never pruned (convolutions) or paired (normalizations).
    exclude: Vec<String>,

    /// Convolution name to the convolution whose mask it mirrors.
    share_mask: BTreeMap<String, String>,

    /// Arguments of the default rule.
    args: PruneArgs,
}

impl ManagerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ranking criterion.
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Exclude a layer by name.
    pub fn exclude(mut self, layer: impl Into<String>) -> Self {
        self.exclude.push(layer.into());
        self
    }

    /// Make `layer` mirror the mask of `source`.
    pub fn share_mask(mut self, layer: impl Into<String>, source: impl Into<String>) -> Self {
        self.share_mask.insert(layer.into(), source.into());
        self
    }

    /// Set the default-rule arguments.
    pub fn with_args(mut self, args: PruneArgs) -> Self {
        self.args = args;
        self
    }

    /// Get the ranking criterion.
    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// Get the excluded layer names.
    pub fn excluded(&self) -> &[String] {
        &self.exclude
    }

    /// Get the share relations.
    pub fn shares(&self) -> &BTreeMap<String, String> {
        &self.share_mask
    }

    /// Get the default-rule arguments.
    pub fn args(&self) -> &PruneArgs {
        &self.args
    }
}
