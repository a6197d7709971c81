//! Host network surface: layers, the computation graph, hooks
//!
//! Just enough of a framework to drive pruning: convolutions, frozen batch
//! norm, ReLU and residual sums, evaluated over a named graph whose layer
//! outputs can be observed through forward and backward hooks.

mod activation;
mod conv;
mod hooks;
mod layer;
mod network;
mod norm;

#[cfg(test)]
mod tests;

pub use activation::{Identity, Relu};
pub use conv::Conv2d;
pub use hooks::{BackwardEvent, BackwardHook, ForwardEvent, ForwardHook, HookGuard, HookHandle};
pub use layer::{Layer, LayerKind};
pub use network::{GraphNode, LayerId, Network, NodeId, NodeInput, NodeOp};
pub use norm::BatchNorm2d;
