//! Pre-norm transformer encoder block.
//!
//! ```text
//! x → LayerNorm → MultiHeadSelfAttention (dropout on attention weights) → + x
//!   → LayerNorm → Linear(D→r·D) → GELU → Dropout → Linear(r·D→D) → Dropout → + x
//! ```
//!
//! Every token attends to every token, the class token included.

use candle_core::{Result, Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

use crate::config::ModelConfig;
use crate::nn::{dropout, LayerNorm};

/// Multi-head scaled dot-product self-attention with a fused QKV projection.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    qkv: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
    dropout: f32,
}

impl MultiHeadAttention {
    pub fn new(dim: usize, num_heads: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let head_dim = dim / num_heads;
        Ok(Self {
            qkv: linear(dim, 3 * dim, vb.pp("qkv"))?,
            out_proj: linear(dim, dim, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
            dropout,
        })
    }

    /// `[B, T, D]` → `[B, T, D]`.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.qkv.forward(xs)?;
        // [B, T, D] → [B, H, T, hd]
        let heads = |offset: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, offset * c, c)?
                .reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let (q, k, v) = (heads(0)?, heads(1)?, heads(2)?);

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let weights = dropout(&weights, self.dropout, train)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, c))?;
        self.out_proj.forward(&context)
    }
}

/// Position-wise feed-forward network.
#[derive(Debug, Clone)]
pub struct FeedForward {
    fc1: Linear,
    fc2: Linear,
    dropout: f32,
}

impl FeedForward {
    pub fn new(dim: usize, hidden: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, hidden, vb.pp("fc1"))?,
            fc2: linear(hidden, dim, vb.pp("fc2"))?,
            dropout,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.fc1.forward(xs)?.gelu_erf()?;
        let h = dropout(&h, self.dropout, train)?;
        let h = self.fc2.forward(&h)?;
        dropout(&h, self.dropout, train)
    }
}

/// One encoder block. Input and output shapes are identical.
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    norm1: LayerNorm,
    attn: MultiHeadAttention,
    norm2: LayerNorm,
    mlp: FeedForward,
}

impl TransformerBlock {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            norm1: LayerNorm::new(config.embed_dim, vb.pp("norm1"))?,
            attn: MultiHeadAttention::new(
                config.embed_dim,
                config.num_heads,
                config.vit_dropout,
                vb.pp("attn"),
            )?,
            norm2: LayerNorm::new(config.embed_dim, vb.pp("norm2"))?,
            mlp: FeedForward::new(
                config.embed_dim,
                config.mlp_hidden_dim(),
                config.vit_dropout,
                vb.pp("mlp"),
            )?,
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attn.forward_t(&self.norm1.forward(xs)?, train)?;
        let xs = (xs + attended)?;
        let fed = self.mlp.forward_t(&self.norm2.forward(&xs)?, train)?;
        xs + fed
    }
}
