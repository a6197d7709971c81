//! Batch normalization layer with frozen running statistics

use super::{Layer, LayerKind};
use crate::autograd::{batch_norm, Context, Tensor};
use crate::error::{PruneError, Result};
use ndarray::Array1;

/// Per-channel batch normalization.
///
/// Always normalizes with the running statistics; updating them is part of
/// training, which this crate does not do.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    epsilon: f32,
}

impl BatchNorm2d {
    /// Identity-initialised normalization over `channels`
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            epsilon: 1e-5,
        }
    }

    /// Set the affine parameters
    pub fn with_affine(mut self, gamma: Array1<f32>, beta: Array1<f32>) -> Result<Self> {
        self.check_len(&gamma)?;
        self.check_len(&beta)?;
        self.gamma = gamma;
        self.beta = beta;
        Ok(self)
    }

    /// Set the running statistics
    pub fn with_running_stats(mut self, mean: Array1<f32>, var: Array1<f32>) -> Result<Self> {
        self.check_len(&mean)?;
        self.check_len(&var)?;
        self.running_mean = mean;
        self.running_var = var;
        Ok(self)
    }

    /// Set epsilon
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn check_len(&self, values: &Array1<f32>) -> Result<()> {
        if values.len() == self.gamma.len() {
            Ok(())
        } else {
            Err(PruneError::ShapeMismatch {
                expected: vec![self.gamma.len()],
                actual: vec![values.len()],
            })
        }
    }
}

impl Layer for BatchNorm2d {
    fn forward(&self, x: &Tensor, _ctx: &Context) -> Result<Tensor> {
        batch_norm(
            x,
            &self.gamma,
            &self.beta,
            &self.running_mean,
            &self.running_var,
            self.epsilon,
        )
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Norm
    }

    fn out_channels(&self) -> Option<usize> {
        Some(self.gamma.len())
    }
}
