//! Pairing layers with graph nodes and convolutions with their normalizations

use super::CrossMapper;
use crate::error::{PruneError, Result};
use crate::nn::{LayerId, LayerKind, Network, NodeId, NodeInput, NodeOp};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Map layers invoked at exactly one graph node to that node's symbolic name.
///
/// Layers invoked several times (or never) have no unique symbol and are left
/// out.
pub fn layer_symbol_mapper(net: &Network) -> Result<CrossMapper<LayerId, String>> {
    let mut layers = Vec::new();
    let mut symbols = Vec::new();
    for id in net.layer_ids() {
        let nodes = net.nodes_of_layer(id);
        if let [node] = nodes[..] {
            if let Some(node) = net.node(node) {
                layers.push(id);
                symbols.push(node.name().to_string());
            }
        }
    }
    CrossMapper::new(layers, symbols)
}

/// Nearest convolutions upstream of `start`, all at the same distance
fn nearest_convs(net: &Network, start: NodeId) -> Vec<LayerId> {
    let mut seen = HashSet::new();
    let mut frontier: Vec<NodeId> = vec![start];
    loop {
        let mut next = Vec::new();
        for id in frontier {
            let Some(node) = net.node(id) else {
                continue;
            };
            for input in node.inputs() {
                if let NodeInput::Node(parent) = *input {
                    if seen.insert(parent) {
                        next.push(parent);
                    }
                }
            }
        }
        if next.is_empty() {
            return Vec::new();
        }

        let mut convs: Vec<LayerId> = Vec::new();
        for &id in &next {
            if let Some(NodeOp::Layer(layer)) = net.node(id).map(|n| n.op()) {
                let is_conv = net.layer(layer).is_ok_and(|l| l.kind() == LayerKind::Conv);
                if is_conv && !convs.contains(&layer) {
                    convs.push(layer);
                }
            }
        }
        if !convs.is_empty() {
            return convs;
        }
        frontier = next;
    }
}

/// Pair every normalization layer with its nearest upstream convolution.
///
/// Walks the graph backward from the normalization's node; the first
/// convolution reached wins. Layers in `exclude` are skipped. A normalization
/// with no convolution upstream fails with `NoConvAncestor`; one with several
/// convolutions at the same distance, or whose convolution is already paired,
/// fails with `AmbiguousPairing`.
pub fn pair_conv_norm(
    net: &Network,
    exclude: &[LayerId],
) -> Result<CrossMapper<LayerId, LayerId>> {
    let symbols = layer_symbol_mapper(net)?;
    let mut convs = Vec::new();
    let mut norms = Vec::new();
    let mut claimed: HashMap<LayerId, LayerId> = HashMap::new();

    for norm in net.layers_of_kind(LayerKind::Norm) {
        if exclude.contains(&norm) {
            continue;
        }
        let name = net.display_name(norm);
        let nodes = net.nodes_of_layer(norm);
        if nodes.len() > 1 {
            let candidates = nodes
                .iter()
                .filter_map(|&n| net.node(n))
                .map(|n| n.name().to_string())
                .collect();
            return Err(PruneError::AmbiguousPairing {
                layer: name,
                candidates,
            });
        }
        let node = symbols
            .get_right(&norm)
            .and_then(|symbol| net.find_node(symbol))
            .ok_or_else(|| PruneError::NoConvAncestor {
                layer: name.clone(),
            })?;

        let found = nearest_convs(net, node);
        let conv = match found[..] {
            [] => return Err(PruneError::NoConvAncestor { layer: name }),
            [conv] => conv,
            ref several => {
                let candidates = several.iter().map(|&c| net.display_name(c)).collect();
                return Err(PruneError::AmbiguousPairing {
                    layer: name,
                    candidates,
                });
            }
        };
        if let Some(&other) = claimed.get(&conv) {
            let candidates = vec![
                net.display_name(conv),
                format!("already paired with {}", net.display_name(other)),
            ];
            return Err(PruneError::AmbiguousPairing {
                layer: name,
                candidates,
            });
        }

        debug!(
            conv = %net.display_name(conv),
            norm = %name,
            "paired convolution with normalization"
        );
        claimed.insert(conv, norm);
        convs.push(conv);
        norms.push(norm);
    }

    CrossMapper::new(convs, norms)
}

/// Activation layer reading the output of `layer` directly, if any.
pub fn activation_after(net: &Network, layer: LayerId) -> Result<Option<LayerId>> {
    net.layer(layer)?;
    for node in net.nodes_of_layer(layer) {
        for consumer in net.consumers(node) {
            if let Some(NodeOp::Layer(next)) = net.node(consumer).map(|n| n.op()) {
                if net.layer(next)?.kind() == LayerKind::Activation {
                    return Ok(Some(next));
                }
            }
        }
    }
    Ok(None)
}
