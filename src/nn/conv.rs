//! 2-D convolution layer

use super::{Layer, LayerKind};
use crate::autograd::{conv2d, Context, ConvGeometry, Tensor};
use crate::error::{PruneError, Result};
use ndarray::{ArrayD, IxDyn};
use rand::Rng;

/// Convolution with weight of shape (out_channels, in_channels, kh, kw).
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Tensor,
    bias: Option<Tensor>,
    geometry: ConvGeometry,
}

impl Conv2d {
    /// Create a convolution from an existing weight tensor
    pub fn new(weight: Tensor, geometry: ConvGeometry) -> Result<Self> {
        if weight.shape().len() != 4 {
            return Err(PruneError::ShapeMismatch {
                expected: vec![0, 0, 0, 0],
                actual: weight.shape().to_vec(),
            });
        }
        Ok(Self {
            weight,
            bias: None,
            geometry,
        })
    }

    /// Kaiming-uniform initialised convolution with a square kernel
    pub fn kaiming_uniform<R: Rng>(
        out_channels: usize,
        in_channels: usize,
        kernel: usize,
        geometry: ConvGeometry,
        rng: &mut R,
    ) -> Self {
        let fan_in = (in_channels * kernel * kernel).max(1) as f32;
        let bound = (6.0 / fan_in).sqrt();
        let shape = [out_channels, in_channels, kernel, kernel];
        let data = ArrayD::from_shape_simple_fn(IxDyn(&shape), || rng.random_range(-bound..bound));
        Self {
            weight: Tensor::new(data, true),
            bias: None,
            geometry,
        }
    }

    /// Attach a bias of length `out_channels`
    pub fn with_bias(mut self, bias: Tensor) -> Result<Self> {
        let oc = self.weight.shape()[0];
        if bias.shape() != [oc] {
            return Err(PruneError::ShapeMismatch {
                expected: vec![oc],
                actual: bias.shape().to_vec(),
            });
        }
        self.bias = Some(bias);
        Ok(self)
    }

    /// Stride and padding
    pub fn geometry(&self) -> ConvGeometry {
        self.geometry
    }

    /// Weight shape as (oc, ic, kh, kw)
    pub fn weight_dims(&self) -> [usize; 4] {
        let s = self.weight.shape();
        [s[0], s[1], s[2], s[3]]
    }
}

impl Layer for Conv2d {
    fn forward(&self, x: &Tensor, _ctx: &Context) -> Result<Tensor> {
        conv2d(x, &self.weight, self.bias.as_ref(), self.geometry)
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Conv
    }

    fn weight(&self) -> Option<&Tensor> {
        Some(&self.weight)
    }

    fn out_channels(&self) -> Option<usize> {
        Some(self.weight.shape()[0])
    }
}
