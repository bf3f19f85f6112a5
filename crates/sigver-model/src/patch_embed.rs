//! Patch embedding: image → `[B, 1 + N, D]` token sequence.
//!
//! The image is cut into a regular grid of non-overlapping patches; each
//! patch is flattened in `(channel, row, column)` order and projected by one
//! shared linear map. This is exactly a convolution whose kernel size equals
//! its stride, so a `[D, C, ph, pw]` convolution kernel reshaped to
//! `[D, C·ph·pw]` loads into `proj` unchanged.

use candle_core::{Result, Tensor};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};

use crate::config::ModelConfig;

/// Learned patch projection, position embedding and class token.
#[derive(Debug, Clone)]
pub struct PatchEmbedding {
    proj: Linear,
    /// `[1, N, D]`, one bias vector per grid position.
    pos_embed: Tensor,
    /// `[1, 1, D]`, broadcast over the batch.
    cls_token: Tensor,
    grid: (usize, usize),
    patch: (usize, usize),
    in_channels: usize,
    embed_dim: usize,
}

impl PatchEmbedding {
    /// Builds the embedder. The config must already be validated, which
    /// guarantees the image divides evenly into patches.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let proj = linear(config.patch_dim(), config.embed_dim, vb.pp("proj"))?;
        let init = Init::Randn {
            mean: 0.0,
            stdev: 0.02,
        };
        let pos_embed =
            vb.get_with_hints((1, config.num_patches(), config.embed_dim), "pos_embed", init)?;
        let cls_token = vb.get_with_hints((1, 1, config.embed_dim), "cls_token", init)?;
        Ok(Self {
            proj,
            pos_embed,
            cls_token,
            grid: config.patch_grid(),
            patch: (config.patch_height, config.patch_width),
            in_channels: config.in_channels,
            embed_dim: config.embed_dim,
        })
    }

    /// Number of patch tokens (excluding the class token).
    pub fn num_patches(&self) -> usize {
        self.grid.0 * self.grid.1
    }

    /// `[B, C, H, W]` → `[B, 1 + N, D]`.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let b = images.dim(0)?;
        let (rows, cols) = self.grid;
        let (ph, pw) = self.patch;
        let c = self.in_channels;
        // [B·C·rows, ph, cols, pw] → [B·C·rows, cols, ph, pw]
        let patches = images
            .reshape((b * c * rows, ph, cols, pw))?
            .transpose(1, 2)?
            .reshape((b, c, rows * cols, ph * pw))?
            .transpose(1, 2)?
            .reshape((b, rows * cols, c * ph * pw))?;
        let tokens = self.proj.forward(&patches)?.broadcast_add(&self.pos_embed)?;
        let cls = self.cls_token.broadcast_as((b, 1, self.embed_dim))?;
        Tensor::cat(&[&cls, &tokens], 1)
    }
}
