//! Error types with actionable diagnostics.
//!
//! Configuration errors are raised as soon as an inconsistent set-up is
//! detected (sharing with an unknown convolution, analysing before build,
//! unpaired normalization layers). State errors are raised when a ranking is
//! requested from statistics that were never collected.

use thiserror::Error;

/// Result type alias for pruning operations.
pub type Result<T> = std::result::Result<T, PruneError>;

/// Errors produced by the pruning engine and its host surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PruneError {
    /// A layer id does not belong to the network it was used with.
    #[error("Unknown layer: {layer}\n  → Register the layer on this network before referencing it")]
    UnknownLayer { layer: String },

    /// Two layers were registered under the same name.
    #[error("Duplicate layer name: {name}\n  → Layer names must be unique within a network")]
    DuplicateLayer { name: String },

    /// The layer chosen for pruning is not a convolution.
    #[error("Layer '{layer}' is not a convolution\n  → Only Conv2d layers own prunable output channels")]
    NotConvolution { layer: String },

    /// A pruner asked to share the mask of a convolution nobody prunes.
    #[error("Layer '{layer}' shares its mask with '{target}', which has no registered pruner\n  → Add a pruner for '{target}' or drop the share relation")]
    UnknownShareTarget { layer: String, target: String },

    /// Share relations loop back onto themselves.
    #[error("Mask sharing forms a cycle through '{layer}'")]
    ShareCycle { layer: String },

    /// A shared mask was read before `build()` resolved it.
    #[error("Mask of '{layer}' is shared but not resolved yet\n  → Call PrunerManager::build() before running the network")]
    UnresolvedShare { layer: String },

    /// A pruner that mirrors another pruner's mask tried to write its own.
    #[error("Layer '{layer}' mirrors another mask and cannot own one")]
    SharedMaskMutation { layer: String },

    /// `analyse()` was called before `build()` inferred output sizes.
    #[error("Output sizes are unknown\n  → Call PrunerManager::build() before analyse()")]
    NotBuilt,

    /// The manager holds no pruners.
    #[error("No pruners registered\n  → Add pruners with add() or compose() first")]
    NoPruners,

    /// A normalization layer has no convolution feeding it.
    #[error("Normalization layer '{layer}' has no convolutional ancestor\n  → Exclude it from pairing")]
    NoConvAncestor { layer: String },

    /// A normalization layer cannot be paired with a single convolution.
    #[error("Normalization layer '{layer}' has ambiguous convolution candidates: {candidates:?}\n  → Exclude it from pairing")]
    AmbiguousPairing {
        layer: String,
        candidates: Vec<String>,
    },

    /// Two index-aligned collections differ in length.
    #[error("Cross mapper collections differ in length ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },

    /// The base pruner has no ranking strategy.
    #[error("Pruner for '{layer}' has no default pruning strategy\n  → Use a ranking pruner such as L1RankPruner")]
    Unimplemented { layer: String },

    /// Ranking was requested before any statistics were accumulated.
    #[error("No statistics accumulated for '{layer}'\n  → Run evaluation-mode passes before pruning")]
    EmptyStatistics { layer: String },

    /// The convolution weight carries no gradient.
    #[error("Weight of '{layer}' has no gradient\n  → Run a backward pass before gradient ranking")]
    MissingGradient { layer: String },

    /// Tensor shapes do not agree.
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A mask contains something other than 0 or 1.
    #[error("Invalid channel mask: {reason}")]
    InvalidMask { reason: String },

    /// The prune fraction is outside [0, 1].
    #[error("Invalid prune fraction {value} (must be within [0.0, 1.0])")]
    InvalidFraction { value: f64 },

    /// Entropy ranking needs at least one histogram bin.
    #[error("Invalid bin count {value} (must be > 0)")]
    InvalidBins { value: usize },
}

impl PruneError {
    /// Check if this error stems from set-up rather than from data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownLayer { .. }
                | Self::DuplicateLayer { .. }
                | Self::NotConvolution { .. }
                | Self::UnknownShareTarget { .. }
                | Self::ShareCycle { .. }
                | Self::UnresolvedShare { .. }
                | Self::SharedMaskMutation { .. }
                | Self::NotBuilt
                | Self::NoPruners
                | Self::NoConvAncestor { .. }
                | Self::AmbiguousPairing { .. }
                | Self::LengthMismatch { .. }
                | Self::Unimplemented { .. }
        )
    }
}
