//! Layer arena plus the symbolic computation graph that invokes it

use super::hooks::{
    BackwardEvent, BackwardHook, ForwardEvent, ForwardHook, HookGuard, HookHandle, HookRegistry,
};
use super::{Identity, Layer, LayerKind};
use crate::autograd::{add, grad_tap, Context, Tensor};
use crate::error::{PruneError, Result};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Index of a layer instance within its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(usize);

impl LayerId {
    /// Position in registration order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a node of the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in evaluation order
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a node reads one of its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeInput {
    /// The tensor passed to `Network::forward`
    Data,
    /// Output of an earlier node
    Node(NodeId),
}

impl From<NodeId> for NodeInput {
    fn from(id: NodeId) -> Self {
        NodeInput::Node(id)
    }
}

/// Operation performed by a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOp {
    /// Invoke a registered layer on the single input
    Layer(LayerId),
    /// Element-wise sum of two inputs
    Add,
}

/// A node of the computation graph, addressed by its symbolic name.
#[derive(Debug, Clone)]
pub struct GraphNode {
    name: String,
    op: NodeOp,
    inputs: Vec<NodeInput>,
}

impl GraphNode {
    /// Symbolic name, unique within the graph
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation of the node
    pub fn op(&self) -> NodeOp {
        self.op
    }

    /// Inputs in argument order
    pub fn inputs(&self) -> &[NodeInput] {
        &self.inputs
    }
}

struct LayerEntry {
    name: String,
    layer: Box<dyn Layer>,
    invocations: usize,
}

fn unknown_layer(id: LayerId) -> PruneError {
    PruneError::UnknownLayer {
        layer: format!("{id:?}"),
    }
}

/// A network: named layer instances and the graph that calls them.
///
/// Nodes are evaluated in creation order; inputs may only reference earlier
/// nodes, so the graph is acyclic by construction. A layer may be invoked by
/// several nodes (weight sharing); its hooks then fire once per invocation.
pub struct Network {
    layers: Vec<LayerEntry>,
    names: HashMap<String, LayerId>,
    nodes: Vec<GraphNode>,
    output: Option<NodeId>,
    adds: usize,
    hooks: RefCell<HookRegistry>,
}

impl Network {
    /// Create an empty network
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            names: HashMap::new(),
            nodes: Vec::new(),
            output: None,
            adds: 0,
            hooks: RefCell::new(HookRegistry::default()),
        }
    }

    /// Register a layer under a unique name
    pub fn add_layer(
        &mut self,
        name: impl Into<String>,
        layer: impl Layer + 'static,
    ) -> Result<LayerId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(PruneError::DuplicateLayer { name });
        }
        let id = LayerId(self.layers.len());
        self.names.insert(name.clone(), id);
        self.layers.push(LayerEntry {
            name,
            layer: Box::new(layer),
            invocations: 0,
        });
        Ok(id)
    }

    /// Append a node invoking `layer` on `input`
    pub fn call(&mut self, layer: LayerId, input: impl Into<NodeInput>) -> Result<NodeId> {
        let input = input.into();
        self.check_input(input)?;
        let entry = self.entry_mut(layer)?;
        let name = match entry.invocations {
            0 => format!("{}_fwd", entry.name),
            k => format!("{}_fwd{k}", entry.name),
        };
        entry.invocations += 1;
        Ok(self.push_node(name, NodeOp::Layer(layer), vec![input]))
    }

    /// Append a node summing two earlier outputs
    pub fn add(&mut self, a: impl Into<NodeInput>, b: impl Into<NodeInput>) -> Result<NodeId> {
        let (a, b) = (a.into(), b.into());
        self.check_input(a)?;
        self.check_input(b)?;
        let name = format!("add{}", self.adds);
        self.adds += 1;
        Ok(self.push_node(name, NodeOp::Add, vec![a, b]))
    }

    /// Chain layers one after another, returning the last node
    pub fn sequential(
        &mut self,
        input: impl Into<NodeInput>,
        layers: &[LayerId],
    ) -> Result<NodeInput> {
        let mut current = input.into();
        for &layer in layers {
            current = NodeInput::Node(self.call(layer, current)?);
        }
        Ok(current)
    }

    /// Choose the node returned by `forward` (defaults to the last node)
    pub fn set_output(&mut self, node: NodeId) -> Result<()> {
        self.check_input(NodeInput::Node(node))?;
        self.output = Some(node);
        Ok(())
    }

    fn check_input(&self, input: NodeInput) -> Result<()> {
        if let NodeInput::Node(id) = input {
            if id.0 >= self.nodes.len() {
                return Err(PruneError::UnknownLayer {
                    layer: format!("node {}", id.0),
                });
            }
        }
        Ok(())
    }

    fn push_node(&mut self, name: String, op: NodeOp, inputs: Vec<NodeInput>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode { name, op, inputs });
        id
    }

    fn entry(&self, id: LayerId) -> Result<&LayerEntry> {
        self.layers.get(id.0).ok_or_else(|| unknown_layer(id))
    }

    fn entry_mut(&mut self, id: LayerId) -> Result<&mut LayerEntry> {
        self.layers.get_mut(id.0).ok_or_else(|| unknown_layer(id))
    }

    /// Layer instance behind `id`
    pub fn layer(&self, id: LayerId) -> Result<&dyn Layer> {
        Ok(self.entry(id)?.layer.as_ref())
    }

    /// Mutable layer instance behind `id`
    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut dyn Layer> {
        Ok(self.entry_mut(id)?.layer.as_mut())
    }

    /// Registered name of a layer
    pub fn layer_name(&self, id: LayerId) -> Result<&str> {
        Ok(&self.entry(id)?.name)
    }

    /// Name of a layer, or its debug form if it is not part of this network
    pub(crate) fn display_name(&self, id: LayerId) -> String {
        self.layer_name(id)
            .map_or_else(|_| format!("{id:?}"), str::to_string)
    }

    /// Look a layer up by name
    pub fn find_layer(&self, name: &str) -> Option<LayerId> {
        self.names.get(name).copied()
    }

    /// All layer ids in registration order
    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        (0..self.layers.len()).map(LayerId)
    }

    /// Layers of the given kind, in registration order
    pub fn layers_of_kind(&self, kind: LayerKind) -> Vec<LayerId> {
        self.layer_ids()
            .filter(|&id| self.layers[id.0].layer.kind() == kind)
            .collect()
    }

    /// Replace a layer by a wrapper built from it
    pub fn wrap_layer(
        &mut self,
        id: LayerId,
        wrap: impl FnOnce(Box<dyn Layer>) -> Box<dyn Layer>,
    ) -> Result<()> {
        let entry = self.entry_mut(id)?;
        let inner = std::mem::replace(&mut entry.layer, Box::new(Identity));
        entry.layer = wrap(inner);
        Ok(())
    }

    /// Graph nodes in evaluation order
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Node by id
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)
    }

    /// Node carrying a symbolic name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// Nodes that invoke `layer`
    pub fn nodes_of_layer(&self, layer: LayerId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.op == NodeOp::Layer(layer))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Nodes reading the output of `node`
    pub fn consumers(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.inputs.contains(&NodeInput::Node(node)))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Attach a hook observing every output of `layer`
    pub fn register_forward_hook(
        &self,
        layer: LayerId,
        hook: impl FnMut(&ForwardEvent<'_>) + 'static,
    ) -> Result<HookHandle> {
        let name = &self.entry(layer)?.name;
        let hook: ForwardHook = Box::new(hook);
        let handle = self.hooks.borrow_mut().add_forward(layer, hook);
        trace!(layer = %name, ?handle, "forward hook attached");
        Ok(handle)
    }

    /// Attach a hook observing the gradient of every output of `layer`
    pub fn register_backward_hook(
        &self,
        layer: LayerId,
        hook: impl FnMut(&BackwardEvent<'_>) + 'static,
    ) -> Result<HookHandle> {
        let name = &self.entry(layer)?.name;
        let hook: BackwardHook = Rc::new(RefCell::new(hook));
        let handle = self.hooks.borrow_mut().add_backward(layer, hook);
        trace!(layer = %name, ?handle, "backward hook attached");
        Ok(handle)
    }

    /// Attach a forward hook that is detached when the guard drops
    pub fn scoped_forward_hook(
        &self,
        layer: LayerId,
        hook: impl FnMut(&ForwardEvent<'_>) + 'static,
    ) -> Result<HookGuard<'_>> {
        let handle = self.register_forward_hook(layer, hook)?;
        Ok(HookGuard::new(&self.hooks, handle))
    }

    /// Detach a hook; returns whether it was attached
    pub fn remove_hook(&self, handle: HookHandle) -> bool {
        self.hooks.borrow_mut().remove(handle)
    }

    /// Number of attached hooks
    pub fn hook_count(&self) -> usize {
        self.hooks.borrow().len()
    }

    /// Evaluate the graph on `x`
    pub fn forward(&self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        let mut values: Vec<Tensor> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let fetch = |input: &NodeInput| match input {
                NodeInput::Data => x.clone(),
                NodeInput::Node(id) => values[id.0].clone(),
            };
            let out = match node.op {
                NodeOp::Add => add(&fetch(&node.inputs[0]), &fetch(&node.inputs[1]))?,
                NodeOp::Layer(id) => {
                    let input = fetch(&node.inputs[0]);
                    let out = self.layers[id.0].layer.forward(&input, ctx)?;
                    self.observe(id, out, ctx)
                }
            };
            values.push(out);
        }

        let output = self
            .output
            .map(|id| id.0)
            .or_else(|| values.len().checked_sub(1));
        Ok(match output {
            Some(i) => values.swap_remove(i),
            None => x.clone(),
        })
    }

    fn observe(&self, layer: LayerId, out: Tensor, ctx: &Context) -> Tensor {
        let training = ctx.is_training();
        let mut registry = self.hooks.borrow_mut();
        registry.fire_forward(&ForwardEvent {
            layer,
            output: &out,
            training,
        });

        let taps = registry.backward_hooks(layer);
        if taps.is_empty() {
            return out;
        }
        drop(registry);

        grad_tap(
            &out,
            Rc::new(move |output: &ArrayD<f32>, grad_output: &ArrayD<f32>| {
                let event = BackwardEvent {
                    layer,
                    output,
                    grad_output,
                    training,
                };
                for hook in taps.iter().filter_map(|weak| weak.upgrade()) {
                    (&mut *hook.borrow_mut())(&event);
                }
            }),
        )
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layers: Vec<&str> = self.layers.iter().map(|e| e.name.as_str()).collect();
        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        f.debug_struct("Network")
            .field("layers", &layers)
            .field("nodes", &nodes)
            .field("hooks", &self.hook_count())
            .finish()
    }
}
