//! Vision branch: patch embedding → transformer stack → global descriptor.

use candle_core::{IndexOp, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::ModelConfig;
use crate::nn::LayerNorm;
use crate::patch_embed::PatchEmbedding;
use crate::transformer::TransformerBlock;

/// Vision-transformer encoder producing a `[B, 2D]` descriptor.
///
/// The descriptor concatenates the final class-token state with the mean of
/// all final patch-token states.
#[derive(Debug, Clone)]
pub struct SignatureViT {
    patch_embed: PatchEmbedding,
    blocks: Vec<TransformerBlock>,
    norm: LayerNorm,
    feature_dim: usize,
}

impl SignatureViT {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let patch_embed = PatchEmbedding::new(config, vb.pp("patch_embed"))?;
        let blocks = (0..config.depth)
            .map(|i| TransformerBlock::new(config, vb.pp(format!("blocks.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let norm = LayerNorm::new(config.embed_dim, vb.pp("norm"))?;
        Ok(Self {
            patch_embed,
            blocks,
            norm,
            feature_dim: config.vision_dim(),
        })
    }

    /// Descriptor width (2 × embed_dim).
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// `[B, C, H, W]` → `[B, 2D]`.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let mut tokens = self.patch_embed.forward(images)?;
        for block in &self.blocks {
            tokens = block.forward_t(&tokens, train)?;
        }
        let tokens = self.norm.forward(&tokens)?;
        let cls = tokens.i((.., 0))?;
        let patch_mean = tokens.i((.., 1..))?.mean(1)?;
        Tensor::cat(&[&cls, &patch_mean], 1)
    }
}
