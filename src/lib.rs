//! # podar
//!
//! Structured channel pruning for convolutional networks.
//!
//! A pruner attaches a binary per-channel mask to the output of one
//! convolution (or of the normalization right after it) and decides which
//! channels survive from a ranking criterion: filter magnitude, activation
//! sparsity, activation entropy, first-order Taylor importance or
//! weight-gradient products. A [`PrunerManager`] places pruners over a whole
//! network, lets several convolutions share one mask (as residual branches
//! feeding the same sum must), and reports the fraction of parameters and
//! multiply-accumulates removed.
//!
//! ## Modules
//!
//! - [`autograd`]: tape-based tensors and the ops the network uses
//! - [`nn`]: layers, the named computation graph and its hooks
//! - [`pruner`]: masks, masked layers and the [`Pruner`] trait
//! - [`rank`]: ranking criteria and their statistics
//! - [`graph`]: conv/norm pairing and layer/symbol cross-references
//! - [`manager`]: many pruners over one network
//! - [`config`]: criteria and pruning arguments
//!
//! ## Example
//!
//! ```
//! use podar::autograd::{ConvGeometry, Tensor};
//! use podar::config::PruneArgs;
//! use podar::nn::{Conv2d, Network, NodeInput};
//! use podar::rank::L1RankPruner;
//! use podar::PrunerManager;
//!
//! let mut net = Network::new();
//! let weight = Tensor::from_shape_vec(&[4, 1, 1, 1], vec![0.1, 2.0, 0.2, 3.0], true).unwrap();
//! let geometry = ConvGeometry { stride: 1, padding: 0 };
//! let conv = net.add_layer("conv", Conv2d::new(weight, geometry).unwrap()).unwrap();
//! net.call(conv, NodeInput::Data).unwrap();
//!
//! let mut manager = PrunerManager::new();
//! manager.add(L1RankPruner::new(&mut net, conv, conv, None).unwrap());
//! manager.build(&net, [1, 1, 8, 8]).unwrap();
//! manager.prune(&net, &PruneArgs::new().with_sensitivity(0.5)).unwrap();
//!
//! let (params, _macs) = manager.analyse().unwrap();
//! assert!((params - 0.5).abs() < 1e-12);
//! ```

pub mod autograd;
pub mod config;
pub mod error;
pub mod graph;
pub mod manager;
pub mod nn;
pub mod pruner;
pub mod rank;

pub use config::{Criterion, ManagerConfig, PruneArgs};
pub use error::{PruneError, Result};
pub use manager::PrunerManager;
pub use pruner::{ChannelPruner, LayerAnalysis, Mask, MaskSlot, Pruner, PrunerCore};
