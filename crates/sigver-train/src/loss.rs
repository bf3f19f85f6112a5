//! Composite BCE + margin-contrastive loss.

use candle_core::{Result, Tensor};

/// Lower bound applied to `log(p)` and `log(1 - p)`, matching the usual BCE clamp.
const LOG_FLOOR: f64 = -100.0;

/// `alpha · BCE + (1 − alpha) · contrastive`.
///
/// The contrastive term averages `max(0, 1 − p)²` over authentic pairs and
/// `max(0, p − margin)²` over forged pairs separately, then takes the mean of
/// the two sides. A side with no samples contributes 0.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use sigver_train::loss::CompositeLoss;
///
/// let loss = CompositeLoss::new(0.7, 0.5);
/// let p = Tensor::new(&[0.9f32, 0.1], &Device::Cpu).unwrap();
/// let y = Tensor::new(&[1.0f32, 0.0], &Device::Cpu).unwrap();
/// let value = loss.forward(&p, &y).unwrap().to_scalar::<f32>().unwrap();
/// assert!(value.is_finite());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CompositeLoss {
    pub alpha: f64,
    pub margin: f64,
}

impl CompositeLoss {
    pub fn new(alpha: f64, margin: f64) -> Self {
        Self { alpha, margin }
    }

    /// Scalar loss for probabilities `p` `[B]` and labels `y` `[B]` in {0, 1}.
    ///
    /// Only for scoring: the gradient is NaN where `p` rounds to 0 or 1.
    /// Training goes through [`Self::forward_logits`].
    pub fn forward(&self, p: &Tensor, y: &Tensor) -> Result<Tensor> {
        let bce = binary_cross_entropy(p, y)?;
        let contrastive = self.contrastive(p, y)?;
        (bce * self.alpha)? + (contrastive * (1.0 - self.alpha))?
    }

    /// Same loss computed from raw logits `[B]`; finite gradients for any logit.
    pub fn forward_logits(&self, logits: &Tensor, y: &Tensor) -> Result<Tensor> {
        let bce = binary_cross_entropy_with_logits(logits, y)?;
        let p = candle_nn::ops::sigmoid(logits)?;
        let contrastive = self.contrastive(&p, y)?;
        (bce * self.alpha)? + (contrastive * (1.0 - self.alpha))?
    }

    fn contrastive(&self, p: &Tensor, y: &Tensor) -> Result<Tensor> {
        let positives = y.sum_all()?.to_scalar::<f32>()? as f64;
        let negatives = y.elem_count() as f64 - positives;
        let zero = Tensor::zeros((), p.dtype(), p.device())?;

        let pos = if positives > 0.0 {
            let diff = p.affine(-1.0, 1.0)?.relu()?.sqr()?;
            ((diff * y)?.sum_all()? / positives)?
        } else {
            zero.clone()
        };
        let neg = if negatives > 0.0 {
            let diff = p.affine(1.0, -self.margin)?.relu()?.sqr()?;
            let mask = y.affine(-1.0, 1.0)?;
            ((diff * mask)?.sum_all()? / negatives)?
        } else {
            zero
        };
        (pos + neg)? / 2.0
    }
}

/// Mean binary cross-entropy on probabilities, logs clamped at −100.
pub fn binary_cross_entropy(p: &Tensor, y: &Tensor) -> Result<Tensor> {
    let log_p = p.log()?.maximum(LOG_FLOOR)?;
    let log_q = p.affine(-1.0, 1.0)?.log()?.maximum(LOG_FLOOR)?;
    let not_y = y.affine(-1.0, 1.0)?;
    let ll = ((y * log_p)? + (not_y * log_q)?)?;
    ll.mean_all()?.neg()
}

/// Mean binary cross-entropy on logits: `relu(x) − x·y + log(1 + exp(−|x|))`.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, y: &Tensor) -> Result<Tensor> {
    let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    let per_sample = ((logits.relu()? - (logits * y)?)? + softplus)?;
    per_sample.mean_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn t(values: &[f32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    fn scalar(x: Tensor) -> f32 {
        x.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn bce_matches_closed_form() {
        let value = scalar(binary_cross_entropy(&t(&[0.8, 0.4]), &t(&[1.0, 0.0])).unwrap());
        let expected = -(0.8f32.ln() + 0.6f32.ln()) / 2.0;
        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn bce_saturates_instead_of_inf() {
        let value = scalar(binary_cross_entropy(&t(&[0.0]), &t(&[1.0])).unwrap());
        assert!((value - 100.0).abs() < 1e-3);
    }

    #[test]
    fn composite_known_value() {
        let loss = CompositeLoss::new(0.7, 0.5);
        let p = t(&[0.8, 0.7]);
        let y = t(&[1.0, 0.0]);
        let bce = -(0.8f32.ln() + 0.3f32.ln()) / 2.0;
        // pos: (1 - 0.8)^2 = 0.04, neg: (0.7 - 0.5)^2 = 0.04
        let contrastive = (0.04 + 0.04) / 2.0;
        let expected = 0.7 * bce + 0.3 * contrastive;
        let value = scalar(loss.forward(&p, &y).unwrap());
        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn single_class_batch_is_finite() {
        let loss = CompositeLoss::new(0.7, 0.5);
        let only_pos = scalar(loss.forward(&t(&[0.6, 0.9]), &t(&[1.0, 1.0])).unwrap());
        let only_neg = scalar(loss.forward(&t(&[0.6, 0.1]), &t(&[0.0, 0.0])).unwrap());
        assert!(only_pos.is_finite());
        assert!(only_neg.is_finite());
    }

    #[test]
    fn negatives_below_margin_have_no_contrastive_penalty() {
        let loss = CompositeLoss::new(0.0, 0.5);
        let value = scalar(loss.forward(&t(&[0.2, 0.4]), &t(&[0.0, 0.0])).unwrap());
        assert!(value.abs() < 1e-7);
    }

    #[test]
    fn bce_with_logits_matches_probability_form() {
        let logits = t(&[1.5, -0.5, 0.2]);
        let y = t(&[1.0, 0.0, 0.0]);
        let p = candle_nn::ops::sigmoid(&logits).unwrap();
        let from_logits = scalar(binary_cross_entropy_with_logits(&logits, &y).unwrap());
        let from_probs = scalar(binary_cross_entropy(&p, &y).unwrap());
        assert!((from_logits - from_probs).abs() < 1e-5);
    }

    #[test]
    fn composite_from_logits_matches_probabilities() {
        let loss = CompositeLoss::new(0.7, 0.5);
        let logits = t(&[2.0, 0.4, -1.0]);
        let y = t(&[1.0, 0.0, 0.0]);
        let p = candle_nn::ops::sigmoid(&logits).unwrap();
        let a = scalar(loss.forward_logits(&logits, &y).unwrap());
        let b = scalar(loss.forward(&p, &y).unwrap());
        assert!((a - b).abs() < 1e-5);
    }

    #[test]
    fn saturated_logits_keep_gradients_finite() {
        let x = candle_core::Var::new(&[20f32, -20.0, 0.3, 120.0, -120.0], &Device::Cpu).unwrap();
        let y = t(&[1.0, 0.0, 1.0, 0.0, 1.0]);
        let loss = CompositeLoss::new(0.7, 0.5).forward_logits(x.as_tensor(), &y).unwrap();
        assert!(scalar(loss.clone()).is_finite());
        let grads = loss.backward().unwrap();
        let g = grads.get(x.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        assert!(g.iter().all(|v| v.is_finite()), "{g:?}");
        // confidently wrong samples still push back
        assert!(g[3] > 0.0);
        assert!(g[4] < 0.0);
        assert!(g[2] < 0.0);
    }

    #[test]
    fn gradient_flows_to_predictions() {
        let p = candle_core::Var::new(&[0.6f32, 0.3], &Device::Cpu).unwrap();
        let loss = CompositeLoss::new(0.7, 0.5)
            .forward(p.as_tensor(), &t(&[1.0, 0.0]))
            .unwrap();
        let grads = loss.backward().unwrap();
        let g = grads.get(p.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        assert!(g[0] < 0.0);
        assert!(g[1] > 0.0);
    }
}
