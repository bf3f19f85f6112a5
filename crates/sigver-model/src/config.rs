//! Architecture configuration.
//!
//! One canonical configuration exists; a checkpoint is only loadable into a
//! model built from exactly the configuration it was trained with.

use serde::{Deserialize, Serialize};
use sigver_core::{
    SigError, CONV_FEATURE_DIM, EMBED_DIM, IMAGE_HEIGHT, IMAGE_WIDTH, PATCH_HEIGHT, PATCH_WIDTH,
};

/// Spatial size the convolutional branch pools to before its head.
pub const CONV_POOL_SIZE: (usize, usize) = (4, 8);

/// Channel width of the last convolutional stage.
pub const CONV_LAST_CHANNELS: usize = 256;

/// Smallest image side the convolutional branch can downsample.
pub const MIN_IMAGE_SIDE: usize = 16;

/// Architecture hyperparameters of [`crate::SiameseViT`].
///
/// # Example
///
/// ```
/// use sigver_model::ModelConfig;
///
/// let config = ModelConfig::default();
/// assert_eq!(config.num_patches(), 64);
/// assert_eq!(config.vision_dim(), 512);
/// assert_eq!(config.comparator_input_dim(), 256 * 2 * 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub image_height: usize,
    pub image_width: usize,
    pub patch_height: usize,
    pub patch_width: usize,
    pub in_channels: usize,
    /// Token embedding dimension D.
    pub embed_dim: usize,
    /// Number of transformer blocks.
    pub depth: usize,
    pub num_heads: usize,
    /// Feed-forward expansion factor.
    pub mlp_ratio: f64,
    /// Dropout inside attention and feed-forward layers.
    pub vit_dropout: f32,
    /// Width F of the convolutional descriptor.
    pub conv_feature_dim: usize,
    pub conv_dropout: f32,
    /// Width of the first comparator layer; the second is half of it.
    pub comparator_hidden: usize,
    pub comparator_dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_height: IMAGE_HEIGHT,
            image_width: IMAGE_WIDTH,
            patch_height: PATCH_HEIGHT,
            patch_width: PATCH_WIDTH,
            in_channels: 1,
            embed_dim: EMBED_DIM,
            depth: 6,
            num_heads: 8,
            mlp_ratio: 4.0,
            vit_dropout: 0.1,
            conv_feature_dim: CONV_FEATURE_DIM,
            conv_dropout: 0.3,
            comparator_hidden: 1024,
            comparator_dropout: 0.3,
        }
    }
}

impl ModelConfig {
    /// Checks every invariant the layers rely on.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<(), SigError> {
        let dims = [
            ("image_height", self.image_height),
            ("image_width", self.image_width),
            ("patch_height", self.patch_height),
            ("patch_width", self.patch_width),
            ("in_channels", self.in_channels),
            ("embed_dim", self.embed_dim),
            ("depth", self.depth),
            ("num_heads", self.num_heads),
            ("conv_feature_dim", self.conv_feature_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(SigError::invalid_config(format!("{name} must be non-zero")));
            }
        }
        if self.image_height % self.patch_height != 0 || self.image_width % self.patch_width != 0 {
            return Err(SigError::invalid_config(format!(
                "image {}x{} is not divisible by patch {}x{}",
                self.image_height, self.image_width, self.patch_height, self.patch_width
            )));
        }
        if self.image_height < MIN_IMAGE_SIDE || self.image_width < MIN_IMAGE_SIDE {
            return Err(SigError::invalid_config(format!(
                "image {}x{} is smaller than {MIN_IMAGE_SIDE} pixels on one side",
                self.image_height, self.image_width
            )));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(SigError::invalid_config(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if self.mlp_hidden_dim() == 0 {
            return Err(SigError::invalid_config(format!(
                "mlp_ratio {} yields an empty feed-forward layer",
                self.mlp_ratio
            )));
        }
        if self.comparator_hidden < 2 {
            return Err(SigError::invalid_config(
                "comparator_hidden must be at least 2",
            ));
        }
        for (name, p) in [
            ("vit_dropout", self.vit_dropout),
            ("conv_dropout", self.conv_dropout),
            ("comparator_dropout", self.comparator_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(SigError::invalid_config(format!(
                    "{name} must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }

    /// Patch grid as (rows, columns).
    pub fn patch_grid(&self) -> (usize, usize) {
        (
            self.image_height / self.patch_height,
            self.image_width / self.patch_width,
        )
    }

    pub fn num_patches(&self) -> usize {
        let (rows, cols) = self.patch_grid();
        rows * cols
    }

    /// Flattened length of one patch.
    pub fn patch_dim(&self) -> usize {
        self.in_channels * self.patch_height * self.patch_width
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn mlp_hidden_dim(&self) -> usize {
        (self.embed_dim as f64 * self.mlp_ratio) as usize
    }

    /// Vision descriptor width (class token + patch mean).
    pub fn vision_dim(&self) -> usize {
        2 * self.embed_dim
    }

    /// Comparator input: two raw vision descriptors, two conv descriptors,
    /// the absolute difference and the product-ratio term.
    pub fn comparator_input_dim(&self) -> usize {
        4 * self.vision_dim() + 2 * self.conv_feature_dim
    }
}
