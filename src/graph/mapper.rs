//! Bidirectional lookup between two index-aligned collections

use crate::error::{PruneError, Result};

/// Pairs `left[i]` with `right[i]` and answers lookups in both directions.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossMapper<L, R> {
    left: Vec<L>,
    right: Vec<R>,
}

impl<L: PartialEq, R: PartialEq> CrossMapper<L, R> {
    /// Build from two collections of equal length
    pub fn new(left: Vec<L>, right: Vec<R>) -> Result<Self> {
        if left.len() != right.len() {
            return Err(PruneError::LengthMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        Ok(Self { left, right })
    }

    /// Partner of a left element
    pub fn get_right(&self, item: &L) -> Option<&R> {
        self.left
            .iter()
            .position(|l| l == item)
            .map(|i| &self.right[i])
    }

    /// Partner of a right element
    pub fn get_left(&self, item: &R) -> Option<&L> {
        self.right
            .iter()
            .position(|r| r == item)
            .map(|i| &self.left[i])
    }

    pub fn left(&self) -> &[L] {
        &self.left
    }

    pub fn right(&self) -> &[R] {
        &self.right
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&L, &R)> {
        self.left.iter().zip(&self.right)
    }
}

impl<L, R> Default for CrossMapper<L, R> {
    fn default() -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
        }
    }
}
