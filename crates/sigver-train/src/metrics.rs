//! Thresholded classification metrics over a full prediction set.

use serde::{Deserialize, Serialize};
use sigver_core::{SigError, METRIC_EPSILON};

/// Counts of the four outcomes at a fixed threshold.
///
/// Label convention: 0 = forged (negative), 1 = authentic (positive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Predictions strictly above `threshold` count as authentic.
    pub fn from_predictions(
        predictions: &[f32],
        labels: &[f32],
        threshold: f32,
    ) -> Result<Self, SigError> {
        if predictions.len() != labels.len() {
            return Err(SigError::ShapeMismatch {
                expected: format!("{} labels", predictions.len()),
                actual: format!("{}", labels.len()),
            });
        }
        let mut cm = Self::default();
        for (&p, &y) in predictions.iter().zip(labels) {
            match (p > threshold, y >= 0.5) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (true, false) => cm.fp += 1,
                (false, true) => cm.fn_ += 1,
            }
        }
        Ok(cm)
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// `[[TN, FP], [FN, TP]]`.
    pub fn as_array(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }
}

/// Accuracy, precision, recall and F1 with epsilon-guarded denominators.
///
/// A class that is absent from the prediction set degrades the affected
/// metric to 0 instead of producing NaN.
///
/// # Example
///
/// ```
/// use sigver_train::metrics::Metrics;
///
/// let m = Metrics::compute(&[0.9, 0.2], &[1.0, 0.0], 0.5).unwrap();
/// assert!((m.accuracy - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    #[serde(flatten)]
    pub confusion: ConfusionMatrix,
}

impl Metrics {
    pub fn from_confusion(cm: ConfusionMatrix) -> Self {
        let (tp, tn, fp, fn_) = (cm.tp as f64, cm.tn as f64, cm.fp as f64, cm.fn_ as f64);
        let accuracy = (tp + tn) / (tp + tn + fp + fn_ + METRIC_EPSILON);
        let precision = tp / (tp + fp + METRIC_EPSILON);
        let recall = tp / (tp + fn_ + METRIC_EPSILON);
        let f1 = 2.0 * precision * recall / (precision + recall + METRIC_EPSILON);
        Self {
            accuracy,
            precision,
            recall,
            f1,
            confusion: cm,
        }
    }

    pub fn compute(predictions: &[f32], labels: &[f32], threshold: f32) -> Result<Self, SigError> {
        Ok(Self::from_confusion(ConfusionMatrix::from_predictions(
            predictions,
            labels,
            threshold,
        )?))
    }
}
