//! Asymmetric comparator: fuses both branches' descriptors for a
//! (reference, candidate) pair into one authenticity probability.
//!
//! The fused vector is
//! `[v_ref, v_cand, c_ref, c_cand, |v_ref − v_cand|, (v_ref·v_cand)·(v_cand / (v_ref + ε))]`.
//! The ratio term depends on argument order: the reference is the anchor.

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use sigver_core::RATIO_EPSILON;

use crate::config::ModelConfig;
use crate::nn::{dropout, kaiming_linear, LayerNorm};

/// Descriptors of one image from both branches.
#[derive(Debug, Clone)]
pub struct Descriptors {
    /// `[B, 2D]` vision branch descriptor.
    pub vision: Tensor,
    /// `[B, F]` convolutional branch descriptor.
    pub conv: Tensor,
}

/// Linear → LayerNorm → GELU → Dropout.
#[derive(Debug, Clone)]
struct HiddenLayer {
    linear: Linear,
    norm: LayerNorm,
}

impl HiddenLayer {
    fn new(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear: kaiming_linear(in_dim, out_dim, vb.pp("linear"))?,
            norm: LayerNorm::new(out_dim, vb.pp("norm"))?,
        })
    }

    fn forward_t(&self, xs: &Tensor, p: f32, train: bool) -> Result<Tensor> {
        let xs = self.norm.forward(&self.linear.forward(xs)?)?.gelu_erf()?;
        dropout(&xs, p, train)
    }
}

/// MLP head reducing the six interaction terms to a probability.
#[derive(Debug, Clone)]
pub struct AsymmetricComparator {
    hidden: Vec<HiddenLayer>,
    out: Linear,
    dropout: f32,
}

impl AsymmetricComparator {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let wide = config.comparator_hidden;
        let narrow = wide / 2;
        Ok(Self {
            hidden: vec![
                HiddenLayer::new(config.comparator_input_dim(), wide, vb.pp("hidden.0"))?,
                HiddenLayer::new(wide, narrow, vb.pp("hidden.1"))?,
            ],
            out: kaiming_linear(narrow, 1, vb.pp("out"))?,
            dropout: config.comparator_dropout,
        })
    }

    /// Builds the `[B, 4·2D + 2F]` interaction vector.
    pub fn interactions(reference: &Descriptors, candidate: &Descriptors) -> Result<Tensor> {
        let (va, vb) = (&reference.vision, &candidate.vision);
        let diff = (va - vb)?.abs()?;
        let prod = (va * vb)?;
        let ratio = vb.div(&(va + RATIO_EPSILON)?)?;
        let asym = (prod * ratio)?;
        Tensor::cat(
            &[va, vb, &reference.conv, &candidate.conv, &diff, &asym],
            1,
        )
    }

    /// Raw logit, `[B]`.
    pub fn logits_t(
        &self,
        reference: &Descriptors,
        candidate: &Descriptors,
        train: bool,
    ) -> Result<Tensor> {
        let mut xs = Self::interactions(reference, candidate)?;
        for layer in &self.hidden {
            xs = layer.forward_t(&xs, self.dropout, train)?;
        }
        self.out.forward(&xs)?.squeeze(1)
    }

    /// Authenticity probability in `(0, 1)`, `[B]`.
    pub fn forward_t(
        &self,
        reference: &Descriptors,
        candidate: &Descriptors,
        train: bool,
    ) -> Result<Tensor> {
        candle_nn::ops::sigmoid(&self.logits_t(reference, candidate, train)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn descriptors(vision: &[f32], conv: &[f32]) -> Descriptors {
        Descriptors {
            vision: Tensor::from_slice(vision, (1, vision.len()), &Device::Cpu).unwrap(),
            conv: Tensor::from_slice(conv, (1, conv.len()), &Device::Cpu).unwrap(),
        }
    }

    #[test]
    fn interaction_layout_and_values() {
        let a = descriptors(&[1.0, 2.0], &[9.0]);
        let b = descriptors(&[3.0, -2.0], &[8.0]);
        let x = AsymmetricComparator::interactions(&a, &b)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(x.len(), 4 * 2 + 2);
        assert_eq!(&x[..6], &[1.0, 2.0, 3.0, -2.0, 9.0, 8.0]);
        assert_eq!(&x[6..8], &[2.0, 4.0]);
        // (1·3)·(3/1) = 9, (2·−2)·(−2/2) = 4
        assert!((x[8] - 9.0).abs() < 1e-4);
        assert!((x[9] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn ratio_term_is_order_dependent() {
        let a = descriptors(&[1.0, 4.0], &[0.0]);
        let b = descriptors(&[2.0, 1.0], &[0.0]);
        let ab = AsymmetricComparator::interactions(&a, &b).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let ba = AsymmetricComparator::interactions(&b, &a).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // |a − b| is symmetric, the product-ratio term is not
        assert_eq!(ab[6..8], ba[6..8]);
        assert_ne!(ab[8..10], ba[8..10]);
    }

    #[test]
    fn zero_reference_component_stays_finite() {
        let a = descriptors(&[0.0, 1.0], &[0.0]);
        let b = descriptors(&[0.5, 1.0], &[0.0]);
        let x = AsymmetricComparator::interactions(&a, &b).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn probability_in_unit_interval() {
        let config = ModelConfig {
            embed_dim: 4,
            num_heads: 2,
            conv_feature_dim: 3,
            comparator_hidden: 8,
            ..ModelConfig::default()
        };
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let cmp = AsymmetricComparator::new(&config, vb).unwrap();
        let a = Descriptors {
            vision: Tensor::randn(0f32, 1.0, (5, 8), &Device::Cpu).unwrap(),
            conv: Tensor::randn(0f32, 1.0, (5, 3), &Device::Cpu).unwrap(),
        };
        let b = Descriptors {
            vision: Tensor::randn(0f32, 1.0, (5, 8), &Device::Cpu).unwrap(),
            conv: Tensor::randn(0f32, 1.0, (5, 3), &Device::Cpu).unwrap(),
        };
        let p = cmp.forward_t(&a, &b, false).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(p.len(), 5);
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
