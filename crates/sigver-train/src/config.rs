//! Training hyperparameters.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sigver_core::{SigError, DECISION_THRESHOLD};
use sigver_model::ModelConfig;

/// Configuration for a training run.
///
/// Missing JSON fields fall back to the defaults below.
///
/// # Example
///
/// ```
/// use sigver_train::TrainConfig;
///
/// let config = TrainConfig::default();
/// assert_eq!(config.epochs, 50);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Model architecture (default: canonical).
    pub model: ModelConfig,

    /// Total number of epochs (default: 50).
    pub epochs: usize,

    /// Epochs driven by the linear warmup schedule (default: 5).
    pub warmup_epochs: usize,

    /// Training batch size (default: 32).
    pub batch_size: usize,

    /// Validation batch size (default: 32).
    pub val_batch_size: usize,

    /// Peak AdamW learning rate (default: 1e-4).
    pub learning_rate: f64,

    /// Decoupled weight decay (default: 0.01).
    pub weight_decay: f64,

    /// Fraction of the peak rate used at epoch 0 (default: 0.1).
    pub warmup_start_factor: f64,

    /// Floor of the cosine schedule (default: 1e-6).
    pub min_learning_rate: f64,

    /// Global gradient L2 norm ceiling (default: 1.0).
    pub max_grad_norm: f64,

    /// Weight of the BCE term; contrastive gets `1 - loss_alpha` (default: 0.7).
    pub loss_alpha: f64,

    /// Negative pairs are penalised above this probability (default: 0.5).
    pub loss_margin: f64,

    /// Probability above which a pair counts as authentic (default: 0.5).
    pub decision_threshold: f32,

    pub seed: u64,

    /// Where the best-F1 checkpoint is written.
    pub best_checkpoint: PathBuf,

    /// Where the end-of-run checkpoint is written.
    pub final_checkpoint: PathBuf,

    /// Reshuffle training pairs every epoch (default: true).
    pub shuffle: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            epochs: 50,
            warmup_epochs: 5,
            batch_size: 32,
            val_batch_size: 32,
            learning_rate: 1e-4,
            weight_decay: 0.01,
            warmup_start_factor: 0.1,
            min_learning_rate: 1e-6,
            max_grad_norm: 1.0,
            loss_alpha: 0.7,
            loss_margin: 0.5,
            decision_threshold: DECISION_THRESHOLD,
            seed: 42,
            best_checkpoint: PathBuf::from("best_model.safetensors"),
            final_checkpoint: PathBuf::from("final_model.safetensors"),
            shuffle: true,
        }
    }
}

impl TrainConfig {
    /// Reads a JSON config file and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            SigError::invalid_config(format!("{}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), SigError> {
        self.model.validate()?;
        if self.epochs == 0 {
            return Err(SigError::invalid_config("epochs must be at least 1"));
        }
        if self.warmup_epochs > self.epochs {
            return Err(SigError::invalid_config(format!(
                "warmup_epochs {} exceeds epochs {}",
                self.warmup_epochs, self.epochs
            )));
        }
        if self.batch_size == 0 || self.val_batch_size == 0 {
            return Err(SigError::invalid_config("batch sizes must be non-zero"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(SigError::invalid_config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.loss_alpha) {
            return Err(SigError::invalid_config(format!(
                "loss_alpha must lie in [0, 1], got {}",
                self.loss_alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.warmup_start_factor) {
            return Err(SigError::invalid_config(format!(
                "warmup_start_factor must lie in [0, 1], got {}",
                self.warmup_start_factor
            )));
        }
        if self.max_grad_norm <= 0.0 {
            return Err(SigError::invalid_config("max_grad_norm must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_epochs_rejected() {
        let config = TrainConfig {
            epochs: 0,
            ..TrainConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SigError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn warmup_longer_than_run_rejected() {
        let config = TrainConfig {
            epochs: 3,
            warmup_epochs: 4,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn alpha_out_of_range_rejected() {
        let config = TrainConfig {
            loss_alpha: 1.5,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TrainConfig =
            serde_json::from_str(r#"{"epochs": 3, "learning_rate": 0.001}"#).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.learning_rate, 0.001);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.model, ModelConfig::default());
    }
}
