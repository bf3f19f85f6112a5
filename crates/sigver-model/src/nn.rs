//! Shared layer primitives built from differentiable tensor ops.

use candle_core::{Result, Tensor, D};
use candle_nn::{Init, Linear, VarBuilder};

/// Layer normalization over the last dimension with learnable gamma/beta.
#[derive(Debug, Clone)]
pub(crate) struct LayerNorm {
    gamma: Tensor,
    beta: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub(crate) fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        let gamma = vb.get_with_hints(dim, "gamma", Init::Const(1.0))?;
        let beta = vb.get_with_hints(dim, "beta", Init::Const(0.0))?;
        Ok(Self {
            gamma,
            beta,
            eps: 1e-5,
        })
    }

    pub(crate) fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mean = input.mean_keepdim(D::Minus1)?;
        let centered = input.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (var + self.eps)?.sqrt()?;
        let normed = centered.broadcast_div(&std)?;
        normed.broadcast_mul(&self.gamma)?.broadcast_add(&self.beta)
    }
}

/// Linear layer with Kaiming-normal weights (ReLU gain, fan-in) and zero bias.
pub(crate) fn kaiming_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let stdev = (2.0 / in_dim as f64).sqrt();
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", Init::Randn { mean: 0.0, stdev })?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Applies dropout only in training mode.
pub(crate) fn dropout(xs: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(xs, p)
    } else {
        Ok(xs.clone())
    }
}

/// Adaptive average pooling of a `[B, C, H, W]` tensor to `(out_h, out_w)`.
///
/// Cell `i` along an axis averages input rows `floor(i*in/out)..ceil((i+1)*in/out)`.
pub(crate) fn adaptive_avg_pool2d(xs: &Tensor, (out_h, out_w): (usize, usize)) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    if h % out_h == 0 && w % out_w == 0 {
        let kernel = (h / out_h, w / out_w);
        return xs.avg_pool2d_with_stride(kernel, kernel);
    }
    let bounds = |i: usize, input: usize, output: usize| {
        let start = i * input / output;
        let end = ((i + 1) * input).div_ceil(output);
        (start, end - start)
    };
    let mut rows = Vec::with_capacity(out_h);
    for i in 0..out_h {
        let (h0, hl) = bounds(i, h, out_h);
        let band = xs.narrow(2, h0, hl)?.mean_keepdim(2)?;
        let mut cells = Vec::with_capacity(out_w);
        for j in 0..out_w {
            let (w0, wl) = bounds(j, w, out_w);
            cells.push(band.narrow(3, w0, wl)?.mean_keepdim(3)?);
        }
        rows.push(Tensor::cat(&cells, 3)?);
    }
    Tensor::cat(&rows, 2)
}
