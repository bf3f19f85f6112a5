//! Convolutional branch: local stroke texture descriptor.
//!
//! ```text
//! [B,1,H,W] → Conv5×5/2 → BN → ReLU → MaxPool2   (32 ch)
//!           → Conv3×3   → BN → ReLU → MaxPool2   (64 ch)
//!           → Conv3×3   → BN → ReLU → MaxPool2   (128 ch)
//!           → Conv3×3   → BN → ReLU → AdaptiveAvgPool(4×8)   (256 ch)
//!           → Flatten → Linear → BN → ReLU → Dropout → Linear → [B, F]
//! ```

use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d, linear, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Linear, Module,
    ModuleT, VarBuilder,
};

use crate::config::{ModelConfig, CONV_LAST_CHANNELS, CONV_POOL_SIZE};
use crate::nn::{adaptive_avg_pool2d, dropout};

#[derive(Debug, Clone, Copy)]
enum Downsample {
    MaxPool2,
    Adaptive((usize, usize)),
}

/// Convolution → batch norm → ReLU → pooling.
#[derive(Debug, Clone)]
struct ConvStage {
    conv: Conv2d,
    bn: BatchNorm,
    downsample: Downsample,
}

impl ConvStage {
    #[allow(clippy::too_many_arguments)]
    fn new(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        downsample: Downsample,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding,
            stride,
            ..Default::default()
        };
        Ok(Self {
            conv: conv2d(in_ch, out_ch, kernel, cfg, vb.pp("conv"))?,
            bn: batch_norm(out_ch, BatchNormConfig::default(), vb.pp("bn"))?,
            downsample,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        let xs = self.bn.forward_t(&xs, train)?.relu()?;
        match self.downsample {
            Downsample::MaxPool2 => xs.max_pool2d(2),
            Downsample::Adaptive(size) => adaptive_avg_pool2d(&xs, size),
        }
    }
}

/// Four-stage CNN ending in a fixed-width descriptor.
#[derive(Debug, Clone)]
pub struct ConvFeatureExtractor {
    stages: Vec<ConvStage>,
    fc1: Linear,
    bn: BatchNorm,
    fc2: Linear,
    dropout: f32,
    feature_dim: usize,
}

impl ConvFeatureExtractor {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let c = config.in_channels;
        let stages = vec![
            ConvStage::new(c, 32, 5, 2, 2, Downsample::MaxPool2, vb.pp("stage1"))?,
            ConvStage::new(32, 64, 3, 1, 1, Downsample::MaxPool2, vb.pp("stage2"))?,
            ConvStage::new(64, 128, 3, 1, 1, Downsample::MaxPool2, vb.pp("stage3"))?,
            ConvStage::new(
                128,
                CONV_LAST_CHANNELS,
                3,
                1,
                1,
                Downsample::Adaptive(CONV_POOL_SIZE),
                vb.pp("stage4"),
            )?,
        ];
        let flat = CONV_LAST_CHANNELS * CONV_POOL_SIZE.0 * CONV_POOL_SIZE.1;
        let f = config.conv_feature_dim;
        Ok(Self {
            stages,
            fc1: linear(flat, f, vb.pp("fc1"))?,
            bn: batch_norm(f, BatchNormConfig::default(), vb.pp("fc_bn"))?,
            fc2: linear(f, f, vb.pp("fc2"))?,
            dropout: config.conv_dropout,
            feature_dim: f,
        })
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// `[B, C, H, W]` → `[B, F]`.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = images.clone();
        for stage in &self.stages {
            xs = stage.forward_t(&xs, train)?;
        }
        let xs = xs.flatten_from(1)?;
        let xs = self.fc1.forward(&xs)?;
        let xs = self.bn.forward_t(&xs, train)?.relu()?;
        let xs = dropout(&xs, self.dropout, train)?;
        self.fc2.forward(&xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn extractor(config: &ModelConfig) -> (VarMap, ConvFeatureExtractor) {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let conv = ConvFeatureExtractor::new(config, vb).unwrap();
        (var_map, conv)
    }

    #[test]
    fn canonical_resolution_yields_configured_width() {
        let config = ModelConfig::default();
        let (_vm, conv) = extractor(&config);
        let x = Tensor::randn(0f32, 1.0, (2, 1, 128, 256), &Device::Cpu).unwrap();
        let y = conv.forward_t(&x, false).unwrap();
        assert_eq!(y.dims(), &[2, 512]);
    }

    #[test]
    fn small_resolution_still_pools_to_fixed_size() {
        let config = ModelConfig {
            image_height: 32,
            image_width: 64,
            conv_feature_dim: 24,
            ..ModelConfig::default()
        };
        let (_vm, conv) = extractor(&config);
        let x = Tensor::randn(0f32, 1.0, (3, 1, 32, 64), &Device::Cpu).unwrap();
        assert_eq!(conv.forward_t(&x, false).unwrap().dims(), &[3, 24]);
        assert_eq!(conv.forward_t(&x, true).unwrap().dims(), &[3, 24]);
        assert_eq!(conv.feature_dim(), 24);
    }

    #[test]
    fn batch_norm_statistics_registered_as_variables() {
        let (var_map, _conv) = extractor(&ModelConfig {
            image_height: 32,
            image_width: 64,
            conv_feature_dim: 8,
            ..ModelConfig::default()
        });
        let data = var_map.data().lock().unwrap();
        assert!(data.contains_key("stage1.bn.running_mean"));
        assert!(data.contains_key("stage4.bn.running_var"));
        assert!(data.contains_key("fc_bn.running_mean"));
    }
}
