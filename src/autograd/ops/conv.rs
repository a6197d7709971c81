//! 2-D convolution autograd operation (NCHW, direct loops)

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{PruneError, Result};
use ndarray::{Array1, Array4, ArrayView4, Axis, Ix4};
use std::rc::Rc;

/// Stride and zero padding of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub stride: usize,
    pub padding: usize,
}

impl ConvGeometry {
    /// Output extent along one spatial axis
    fn out_extent(&self, input: usize, kernel: usize) -> Option<usize> {
        let padded = input + 2 * self.padding;
        if padded < kernel || self.stride == 0 {
            return None;
        }
        Some((padded - kernel) / self.stride + 1)
    }

    /// Input coordinate read by output position `o` and kernel tap `k`
    fn source(&self, o: usize, k: usize, input: usize) -> Option<usize> {
        let pos = (o * self.stride + k).checked_sub(self.padding)?;
        (pos < input).then_some(pos)
    }
}

fn as4(t: &Tensor) -> Result<ArrayView4<'_, f32>> {
    t.data()
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| PruneError::ShapeMismatch {
            expected: vec![0, 0, 0, 0],
            actual: t.shape().to_vec(),
        })
}

/// Convolve `x` (N, IC, H, W) with `weight` (OC, IC, KH, KW)
pub fn conv2d(
    x: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    geometry: ConvGeometry,
) -> Result<Tensor> {
    let xv = as4(x)?;
    let wv = as4(weight)?;
    let (n, ic, h, w) = xv.dim();
    let (oc, wic, kh, kw) = wv.dim();
    if ic != wic {
        return Err(PruneError::ShapeMismatch {
            expected: vec![n, wic, h, w],
            actual: x.shape().to_vec(),
        });
    }
    if let Some(b) = bias {
        if b.shape() != [oc] {
            return Err(PruneError::ShapeMismatch {
                expected: vec![oc],
                actual: b.shape().to_vec(),
            });
        }
    }
    let (Some(oh), Some(ow)) = (geometry.out_extent(h, kh), geometry.out_extent(w, kw)) else {
        return Err(PruneError::ShapeMismatch {
            expected: vec![n, ic, kh, kw],
            actual: x.shape().to_vec(),
        });
    };

    let mut out = Array4::<f32>::zeros((n, oc, oh, ow));
    for b in 0..n {
        for o in 0..oc {
            let base = bias.map_or(0.0, |t| t.data()[[o]]);
            for y in 0..oh {
                for z in 0..ow {
                    let mut acc = base;
                    for i in 0..ic {
                        for u in 0..kh {
                            let Some(sy) = geometry.source(y, u, h) else {
                                continue;
                            };
                            for v in 0..kw {
                                let Some(sx) = geometry.source(z, v, w) else {
                                    continue;
                                };
                                acc += xv[[b, i, sy, sx]] * wv[[o, i, u, v]];
                            }
                        }
                    }
                    out[[b, o, y, z]] = acc;
                }
            }
        }
    }

    let requires_grad =
        x.requires_grad() || weight.requires_grad() || bias.is_some_and(Tensor::requires_grad);
    Ok(Tensor::derived(out.into_dyn(), requires_grad, |result_grad| {
        Rc::new(Conv2dBackward {
            x: x.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            geometry,
            result_grad,
        })
    }))
}

struct Conv2dBackward {
    x: Tensor,
    weight: Tensor,
    bias: Option<Tensor>,
    geometry: ConvGeometry,
    result_grad: GradCell,
}

impl BackwardOp for Conv2dBackward {
    fn backward(&self) {
        let cell = self.result_grad.borrow();
        let Some(grad) = cell.as_ref() else {
            return;
        };
        let Ok(g) = grad.view().into_dimensionality::<Ix4>() else {
            return;
        };
        let (Ok(xv), Ok(wv)) = (as4(&self.x), as4(&self.weight)) else {
            return;
        };
        let (n, ic, h, w) = xv.dim();
        let (oc, _, kh, kw) = wv.dim();
        let (_, _, oh, ow) = g.dim();

        let mut grad_x = Array4::<f32>::zeros((n, ic, h, w));
        let mut grad_w = Array4::<f32>::zeros((oc, ic, kh, kw));
        for b in 0..n {
            for o in 0..oc {
                for y in 0..oh {
                    for z in 0..ow {
                        let go = g[[b, o, y, z]];
                        if go == 0.0 {
                            continue;
                        }
                        for i in 0..ic {
                            for u in 0..kh {
                                let Some(sy) = self.geometry.source(y, u, h) else {
                                    continue;
                                };
                                for v in 0..kw {
                                    let Some(sx) = self.geometry.source(z, v, w) else {
                                        continue;
                                    };
                                    grad_x[[b, i, sy, sx]] += go * wv[[o, i, u, v]];
                                    grad_w[[o, i, u, v]] += go * xv[[b, i, sy, sx]];
                                }
                            }
                        }
                    }
                }
            }
        }

        if self.x.requires_grad() {
            self.x.accumulate_grad(grad_x.into_dyn());
        }
        if self.weight.requires_grad() {
            self.weight.accumulate_grad(grad_w.into_dyn());
        }
        if let Some(bias) = self.bias.as_ref().filter(|b| b.requires_grad()) {
            let grad_b: Array1<f32> = g.sum_axis(Axis(3)).sum_axis(Axis(2)).sum_axis(Axis(0));
            bias.accumulate_grad(grad_b.into_dyn());
        }
    }

    fn inputs(&self) -> Vec<&Tensor> {
        let mut inputs = vec![&self.x, &self.weight];
        if let Some(bias) = &self.bias {
            inputs.push(bias);
        }
        inputs
    }
}
