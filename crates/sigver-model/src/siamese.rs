//! Full Siamese model: shared two-branch encoder plus asymmetric comparator.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use sigver_core::{SigError, SignatureImage};

use crate::comparator::{AsymmetricComparator, Descriptors};
use crate::config::ModelConfig;
use crate::conv::ConvFeatureExtractor;
use crate::vit::SignatureViT;

/// Siamese signature verifier.
///
/// Both images of a pair pass through the same encoder (one set of
/// weights), so encoding is deterministic in eval mode and
/// `encode(a)` does not depend on which image it is paired with. The
/// comparator then treats the first argument as the trusted reference.
///
/// All trainable variables live in the owned [`VarMap`] under the prefixes
/// `vit.`, `conv.` and `comparator.`.
///
/// # Example
///
/// ```no_run
/// use candle_core::Device;
/// use sigver_model::{ModelConfig, SiameseViT};
///
/// let model = SiameseViT::new(ModelConfig::default(), &Device::Cpu).unwrap();
/// assert_eq!(model.config().comparator_input_dim(), 3072);
/// ```
pub struct SiameseViT {
    var_map: VarMap,
    config: ModelConfig,
    device: Device,
    vit: SignatureViT,
    conv: ConvFeatureExtractor,
    comparator: AsymmetricComparator,
}

impl std::fmt::Debug for SiameseViT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SiameseViT({}x{} → vit {}x{}d + conv {} → {}, {:.1}M params, device={:?})",
            self.config.image_height,
            self.config.image_width,
            self.config.depth,
            self.config.embed_dim,
            self.config.conv_feature_dim,
            self.config.comparator_hidden,
            self.num_parameters() as f64 / 1_000_000.0,
            self.device
        )
    }
}

impl SiameseViT {
    /// Builds a freshly initialised model.
    ///
    /// # Errors
    ///
    /// Returns [`SigError::InvalidConfig`] if the configuration fails
    /// [`ModelConfig::validate`], or a tensor error if allocation fails.
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self, SigError> {
        config.validate()?;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let vit = SignatureViT::new(&config, vb.pp("vit"))?;
        let conv = ConvFeatureExtractor::new(&config, vb.pp("conv"))?;
        let comparator = AsymmetricComparator::new(&config, vb.pp("comparator"))?;
        tracing::debug!(
            params = var_map.all_vars().len(),
            device = ?device,
            "built siamese model"
        );
        Ok(Self {
            var_map,
            config,
            device: device.clone(),
            vit,
            conv,
            comparator,
        })
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of trainable scalars. Batch-norm running statistics are
    /// buffers and are not counted.
    pub fn num_parameters(&self) -> usize {
        let data = match self.var_map.data().lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        data.iter()
            .filter(|(name, _)| !is_buffer(name))
            .map(|(_, var)| var.elem_count())
            .sum()
    }

    /// Encodes a `[B, C, H, W]` batch into both branch descriptors.
    pub fn encode(&self, images: &Tensor, train: bool) -> Result<Descriptors, SigError> {
        self.check_input(images)?;
        Ok(Descriptors {
            vision: self.vit.forward_t(images, train)?,
            conv: self.conv.forward_t(images, train)?,
        })
    }

    /// Raw comparator logits `[B]` for `(reference, candidate)` batches.
    ///
    /// `train` enables dropout and batch-norm batch statistics.
    pub fn logits_t(
        &self,
        reference: &Tensor,
        candidate: &Tensor,
        train: bool,
    ) -> Result<Tensor, SigError> {
        let (rb, cb) = (reference.dim(0)?, candidate.dim(0)?);
        if rb != cb {
            return Err(SigError::ShapeMismatch {
                expected: format!("candidate batch of {rb}"),
                actual: format!("{cb}"),
            });
        }
        let a = self.encode(reference, train)?;
        let b = self.encode(candidate, train)?;
        Ok(self.comparator.logits_t(&a, &b, train)?)
    }

    /// Authenticity probabilities `[B]`, the logistic of [`Self::logits_t`].
    pub fn forward_t(
        &self,
        reference: &Tensor,
        candidate: &Tensor,
        train: bool,
    ) -> Result<Tensor, SigError> {
        let logits = self.logits_t(reference, candidate, train)?;
        Ok(candle_nn::ops::sigmoid(&logits)?)
    }

    /// Eval-mode probabilities, detached from the autograd graph.
    pub fn predict(&self, reference: &Tensor, candidate: &Tensor) -> Result<Tensor, SigError> {
        Ok(self.forward_t(reference, candidate, false)?.detach())
    }

    /// Scores a single preprocessed pair.
    pub fn predict_pair(
        &self,
        reference: &SignatureImage,
        candidate: &SignatureImage,
    ) -> Result<f32, SigError> {
        let a = reference.to_tensor(&self.device)?;
        let b = candidate.to_tensor(&self.device)?;
        let p = self.predict(&a, &b)?;
        Ok(p.to_vec1::<f32>()?[0])
    }

    fn check_input(&self, images: &Tensor) -> Result<(), SigError> {
        let c = &self.config;
        let ok = match images.dims() {
            [b, ch, h, w] => {
                *b > 0 && *ch == c.in_channels && *h == c.image_height && *w == c.image_width
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(SigError::ShapeMismatch {
                expected: format!(
                    "[B, {}, {}, {}]",
                    c.in_channels, c.image_height, c.image_width
                ),
                actual: format!("{:?}", images.dims()),
            })
        }
    }
}

/// Batch-norm running statistics: stored in the var map, never optimised.
pub fn is_buffer(name: &str) -> bool {
    name.ends_with("running_mean") || name.ends_with("running_var")
}
