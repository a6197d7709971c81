//! Forward and backward hooks on network layers
//!
//! Hooks observe layer outputs (and, for backward hooks, the gradient flowing
//! into those outputs) without changing them. A [`HookHandle`] detaches a hook
//! explicitly; a [`HookGuard`] detaches it when dropped, so a hook added for
//! a single pass never outlives it.

use super::LayerId;
use ndarray::ArrayD;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::autograd::Tensor;

/// Identifies a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

/// A layer produced an output.
#[derive(Debug)]
pub struct ForwardEvent<'a> {
    pub layer: LayerId,
    pub output: &'a Tensor,
    pub training: bool,
}

/// The gradient of a layer output became available.
#[derive(Debug)]
pub struct BackwardEvent<'a> {
    pub layer: LayerId,
    pub output: &'a ArrayD<f32>,
    pub grad_output: &'a ArrayD<f32>,
    /// Mode of the forward pass that produced `output`
    pub training: bool,
}

/// Boxed forward hook.
pub type ForwardHook = Box<dyn FnMut(&ForwardEvent<'_>)>;

/// Shared backward hook; taps created during forward hold weak references.
pub type BackwardHook = Rc<RefCell<dyn FnMut(&BackwardEvent<'_>)>>;

type WeakBackwardHook = Weak<RefCell<dyn FnMut(&BackwardEvent<'_>)>>;

/// Hooks currently attached to a network.
#[derive(Default)]
pub(crate) struct HookRegistry {
    next_id: u64,
    forward: Vec<(HookHandle, LayerId, ForwardHook)>,
    backward: Vec<(HookHandle, LayerId, BackwardHook)>,
}

impl HookRegistry {
    fn next_handle(&mut self) -> HookHandle {
        let handle = HookHandle(self.next_id);
        self.next_id += 1;
        handle
    }

    pub(crate) fn add_forward(&mut self, layer: LayerId, hook: ForwardHook) -> HookHandle {
        let handle = self.next_handle();
        self.forward.push((handle, layer, hook));
        handle
    }

    pub(crate) fn add_backward(&mut self, layer: LayerId, hook: BackwardHook) -> HookHandle {
        let handle = self.next_handle();
        self.backward.push((handle, layer, hook));
        handle
    }

    /// Detach a hook; returns whether it was attached
    pub(crate) fn remove(&mut self, handle: HookHandle) -> bool {
        let before = self.len();
        self.forward.retain(|(h, _, _)| *h != handle);
        self.backward.retain(|(h, _, _)| *h != handle);
        self.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.forward.len() + self.backward.len()
    }

    pub(crate) fn fire_forward(&mut self, event: &ForwardEvent<'_>) {
        for (_, layer, hook) in &mut self.forward {
            if *layer == event.layer {
                hook(event);
            }
        }
    }

    pub(crate) fn backward_hooks(&self, layer: LayerId) -> Vec<WeakBackwardHook> {
        self.backward
            .iter()
            .filter(|(_, l, _)| *l == layer)
            .map(|(_, _, hook)| Rc::downgrade(hook))
            .collect()
    }
}

/// Detaches its hook when dropped.
#[must_use = "the hook is removed as soon as the guard is dropped"]
pub struct HookGuard<'a> {
    registry: &'a RefCell<HookRegistry>,
    handle: HookHandle,
}

impl<'a> HookGuard<'a> {
    pub(crate) fn new(registry: &'a RefCell<HookRegistry>, handle: HookHandle) -> Self {
        Self { registry, handle }
    }

    /// Handle of the guarded hook
    pub fn handle(&self) -> HookHandle {
        self.handle
    }
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        self.registry.borrow_mut().remove(self.handle);
    }
}
