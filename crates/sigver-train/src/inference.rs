//! Evaluation over a loader and single-pair verification.

use serde::{Deserialize, Serialize};
use sigver_core::{SigError, SignatureImage};
use sigver_model::SiameseViT;

use crate::dataset::{BatchLoader, PairDataset};
use crate::loss::CompositeLoss;
use crate::metrics::Metrics;

/// Outcome of verifying one candidate against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// `confidence > threshold`.
    pub authentic: bool,
    /// Model probability that both signatures share an author.
    pub confidence: f32,
}

impl Verdict {
    pub fn from_confidence(confidence: f32, threshold: f32) -> Self {
        Self {
            authentic: confidence > threshold,
            confidence,
        }
    }
}

/// Scores `candidate` against the trusted `reference`.
pub fn verify(
    model: &SiameseViT,
    reference: &SignatureImage,
    candidate: &SignatureImage,
    threshold: f32,
) -> Result<Verdict, SigError> {
    let confidence = model.predict_pair(reference, candidate)?;
    Ok(Verdict::from_confidence(confidence, threshold))
}

/// Loss and metrics over one pass of a loader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Mean per-batch loss; 0 when the loader is empty.
    pub loss: f64,
    pub metrics: Metrics,
}

/// Inference-mode metrics over every batch of `loader`.
pub fn evaluate<D: PairDataset + ?Sized>(
    model: &SiameseViT,
    loader: &mut BatchLoader<'_, D>,
    threshold: f32,
) -> Result<Metrics, SigError> {
    let mut predictions = Vec::with_capacity(loader.dataset_len());
    let mut labels = Vec::with_capacity(loader.dataset_len());
    for batch in loader.epoch() {
        let batch = batch?;
        let p = model.predict(&batch.reference, &batch.candidate)?;
        predictions.extend(p.to_vec1::<f32>()?);
        labels.extend(batch.labels.to_vec1::<f32>()?);
    }
    Metrics::compute(&predictions, &labels, threshold)
}

/// Validation pass: no parameter updates, metrics on the concatenated
/// predictions rather than averaged per batch.
pub fn evaluate_with_loss<D: PairDataset + ?Sized>(
    model: &SiameseViT,
    loader: &mut BatchLoader<'_, D>,
    loss_fn: &CompositeLoss,
    threshold: f32,
) -> Result<EvalReport, SigError> {
    let mut predictions = Vec::with_capacity(loader.dataset_len());
    let mut labels = Vec::with_capacity(loader.dataset_len());
    let mut loss_sum = 0f64;
    let mut batches = 0usize;
    for batch in loader.epoch() {
        let batch = batch?;
        let logits = model
            .logits_t(&batch.reference, &batch.candidate, false)?
            .detach();
        let p = candle_nn::ops::sigmoid(&logits)?;
        let loss = loss_fn
            .forward_logits(&logits, &batch.labels)?
            .to_scalar::<f32>()?;
        loss_sum += loss as f64;
        batches += 1;
        predictions.extend(p.to_vec1::<f32>()?);
        labels.extend(batch.labels.to_vec1::<f32>()?);
    }
    Ok(EvalReport {
        loss: if batches == 0 { 0.0 } else { loss_sum / batches as f64 },
        metrics: Metrics::compute(&predictions, &labels, threshold)?,
    })
}
