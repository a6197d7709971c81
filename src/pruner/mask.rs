//! Channel masks and the slots that own or mirror them

use crate::error::{PruneError, Result};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Binary per-channel mask: 1 keeps a channel, 0 prunes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    values: Array1<f32>,
}

impl Mask {
    /// Mask keeping every channel
    pub fn ones(channels: usize) -> Self {
        Self {
            values: Array1::ones(channels),
        }
    }

    /// Mask from keep flags
    pub fn from_keep(keep: &[bool]) -> Self {
        Self {
            values: keep.iter().map(|&k| if k { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Mask from raw values, which must all be 0 or 1
    pub fn from_values(values: Array1<f32>) -> Result<Self> {
        if let Some(i) = values.iter().position(|&v| v != 0.0 && v != 1.0) {
            let v = values[i];
            return Err(PruneError::InvalidMask {
                reason: format!("entry {i} is {v}, expected 0 or 1"),
            });
        }
        Ok(Self { values })
    }

    /// Number of channels covered
    pub fn channels(&self) -> usize {
        self.values.len()
    }

    /// Number of surviving channels
    pub fn kept(&self) -> usize {
        self.values.iter().filter(|&&v| v != 0.0).count()
    }

    /// Number of pruned channels
    pub fn pruned(&self) -> usize {
        self.channels() - self.kept()
    }

    /// Whether channel `i` survives
    pub fn is_kept(&self, i: usize) -> bool {
        self.values.get(i).is_some_and(|&v| v != 0.0)
    }

    /// Keep flag per channel
    pub fn keep_flags(&self) -> Vec<bool> {
        self.values.iter().map(|&v| v != 0.0).collect()
    }

    /// Raw 0/1 values
    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }
}

#[derive(Debug)]
enum Binding {
    Owned(Mask),
    /// Share requested, not resolved yet
    Pending,
    Shared(MaskSlot),
}

/// Where a pruner's mask lives.
///
/// A slot either owns a mask or mirrors another slot. Clones refer to the same
/// slot, so the masked layer sees every mask a ranking strategy installs and
/// every mirror sees its source's current mask.
#[derive(Debug, Clone)]
pub struct MaskSlot(Rc<RefCell<Binding>>);

impl MaskSlot {
    /// Slot owning `mask`
    pub fn owned(mask: Mask) -> Self {
        Self(Rc::new(RefCell::new(Binding::Owned(mask))))
    }

    /// Slot that will mirror another pruner's mask once resolved
    pub fn pending() -> Self {
        Self(Rc::new(RefCell::new(Binding::Pending)))
    }

    /// Whether this slot mirrors (or will mirror) another slot
    pub fn is_shared(&self) -> bool {
        !matches!(*self.0.borrow(), Binding::Owned(_))
    }

    /// Whether the share relation has been resolved (always true for owners)
    pub fn is_resolved(&self) -> bool {
        match &*self.0.borrow() {
            Binding::Owned(_) => true,
            Binding::Pending => false,
            Binding::Shared(source) => source.is_resolved(),
        }
    }

    /// Run `f` on the mask this slot resolves to
    pub fn with_mask<R>(&self, f: impl FnOnce(&Mask) -> R) -> Option<R> {
        match &*self.0.borrow() {
            Binding::Owned(mask) => Some(f(mask)),
            Binding::Pending => None,
            Binding::Shared(source) => source.with_mask(f),
        }
    }

    /// Copy of the resolved mask
    pub fn resolve(&self) -> Option<Mask> {
        self.with_mask(Mask::clone)
    }

    /// Replace an owned mask; returns false for mirroring slots
    pub(crate) fn replace(&self, mask: Mask) -> bool {
        let mut binding = self.0.borrow_mut();
        match &mut *binding {
            Binding::Owned(current) => {
                *current = mask;
                true
            }
            _ => false,
        }
    }

    /// Slot that owns the mask this slot resolves to
    fn owner(&self) -> Option<MaskSlot> {
        match &*self.0.borrow() {
            Binding::Owned(_) => Some(self.clone()),
            Binding::Pending => None,
            Binding::Shared(source) => source.owner(),
        }
    }

    /// Whether `other` appears on this slot's chain (itself included)
    fn chain_contains(&self, other: &MaskSlot) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match &*self.0.borrow() {
            Binding::Shared(source) => source.chain_contains(other),
            _ => false,
        }
    }

    /// Point this mirroring slot at `source`
    pub(crate) fn bind(&self, source: &MaskSlot) -> std::result::Result<(), ShareCycle> {
        if source.chain_contains(self) {
            return Err(ShareCycle);
        }
        *self.0.borrow_mut() = Binding::Shared(source.clone());
        Ok(())
    }

    /// Whether both slots read the very same mask
    pub fn same_mask(&self, other: &MaskSlot) -> bool {
        match (self.owner(), other.owner()) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

/// Binding a slot would make its chain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShareCycle;
