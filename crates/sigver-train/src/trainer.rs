//! Epoch-driven training loop.
//!
//! ## Per epoch
//!
//! 1. Set the learning rate of the active phase (warmup or main)
//! 2. Train over every batch: forward, loss, backward, clip, AdamW step
//! 3. Validate with gradients detached and dropout off
//! 4. Compute metrics on the concatenated predictions of each phase
//! 5. Step the scheduler once
//! 6. Append a [`HistoryEntry`]; save the best checkpoint on a strictly
//!    higher validation F1
//!
//! After the last epoch a final checkpoint with the full history is written.
//! Any error aborts the run.

use std::path::Path;

use candle_nn::Optimizer;
use serde::{Deserialize, Serialize};
use sigver_core::SigError;
use sigver_model::SiameseViT;

use crate::checkpoint::{
    copy_weights, read_checkpoint, restore_optimizer, save_best, save_final, CheckpointRecord,
};
use crate::config::TrainConfig;
use crate::dataset::{BatchLoader, PairDataset};
use crate::inference::{evaluate_with_loss, EvalReport};
use crate::loss::CompositeLoss;
use crate::metrics::Metrics;
use crate::optim::{clip_grad_norm, AdamW, AdamWParams};
use crate::schedule::{LrScheduler, TrainingPhase};

/// One row of the training history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub epoch: usize,
    pub phase: TrainingPhase,
    /// Rate in effect while this epoch trained.
    pub learning_rate: f64,
    pub train_loss: f64,
    pub val_loss: f64,
    pub train_accuracy: f64,
    pub train_f1: f64,
    pub val_accuracy: f64,
    pub val_precision: f64,
    pub val_recall: f64,
    pub val_f1: f64,
}

/// History plus best-F1 bookkeeping, threaded through the loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    history: Vec<HistoryEntry>,
    best_f1: f64,
    best_epoch: Option<usize>,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry`. Returns `true` when its validation F1 strictly
    /// exceeds every earlier one (ties keep the earlier epoch).
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        let improved = entry.val_f1 > self.best_f1;
        if improved {
            self.best_f1 = entry.val_f1;
            self.best_epoch = Some(entry.epoch);
        }
        self.history.push(entry);
        improved
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn best_f1(&self) -> f64 {
        self.best_f1
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Averages of one training pass.
#[derive(Debug, Clone, Copy)]
struct TrainPass {
    loss: f64,
    metrics: Metrics,
}

/// Owns the optimizer and schedule for one model.
pub struct Trainer<'m> {
    model: &'m SiameseViT,
    config: TrainConfig,
    optimizer: AdamW,
    scheduler: LrScheduler,
    loss: CompositeLoss,
    state: TrainingState,
    start_epoch: usize,
}

impl<'m> Trainer<'m> {
    /// # Errors
    ///
    /// [`SigError::InvalidConfig`] if `config` is invalid or describes a
    /// different architecture than `model`.
    pub fn new(model: &'m SiameseViT, config: TrainConfig) -> Result<Self, SigError> {
        config.validate()?;
        if model.config() != &config.model {
            return Err(SigError::invalid_config(
                "training config describes a different model architecture",
            ));
        }
        let optimizer = AdamW::from_var_map(
            model.var_map(),
            AdamWParams {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..AdamWParams::default()
            },
        )?;
        let scheduler = LrScheduler::new(
            config.learning_rate,
            config.warmup_start_factor,
            config.min_learning_rate,
            config.warmup_epochs,
            config.epochs,
        );
        let loss = CompositeLoss::new(config.loss_alpha, config.loss_margin);
        tracing::info!(
            params = model.num_parameters(),
            tracked = optimizer.num_tracked(),
            epochs = config.epochs,
            "trainer ready"
        );
        Ok(Self {
            model,
            config,
            optimizer,
            scheduler,
            loss,
            state: TrainingState::new(),
            start_epoch: 0,
        })
    }

    /// Continues from a final checkpoint: weights, optimizer state, history
    /// and best-F1 markers are restored and training resumes at the next epoch.
    ///
    /// # Errors
    ///
    /// [`SigError::Checkpoint`] for a best-model checkpoint, which carries no
    /// history or best-F1 markers to continue from.
    pub fn resume(
        model: &'m SiameseViT,
        config: TrainConfig,
        checkpoint: impl AsRef<Path>,
    ) -> Result<Self, SigError> {
        let mut trainer = Self::new(model, config)?;
        let checkpoint = read_checkpoint(checkpoint, model.device())?;
        let CheckpointRecord::Final {
            best_f1,
            best_epoch,
            history,
        } = &checkpoint.meta.record
        else {
            return Err(SigError::checkpoint(
                "resume needs a final checkpoint; best-model checkpoints carry no training history",
            ));
        };
        crate::checkpoint::check_config(&checkpoint.meta.model_config, model.config())?;
        copy_weights(model, &checkpoint.model)?;
        restore_optimizer(&checkpoint, &mut trainer.optimizer)?;
        trainer.state = TrainingState {
            history: history.clone(),
            best_f1: *best_f1,
            best_epoch: *best_epoch,
        };
        trainer.start_epoch = checkpoint.meta.epoch + 1;
        trainer.scheduler.set_epoch(trainer.start_epoch);
        tracing::info!(start_epoch = trainer.start_epoch, "resuming training");
        Ok(trainer)
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn optimizer(&self) -> &AdamW {
        &self.optimizer
    }

    /// Runs the remaining epochs and returns the final state.
    ///
    /// # Errors
    ///
    /// [`SigError::Dataset`] if `train` is empty; otherwise the first error
    /// raised by any batch, without retry.
    pub fn fit<T, V>(mut self, train: &T, val: &V) -> Result<TrainingState, SigError>
    where
        T: PairDataset + ?Sized,
        V: PairDataset + ?Sized,
    {
        if train.is_empty() {
            return Err(SigError::dataset("no training pairs provided"));
        }
        if val.is_empty() {
            tracing::warn!("validation set is empty; validation F1 stays at 0");
        }
        let device = self.model.device().clone();
        let mut train_loader = BatchLoader::new(
            train,
            self.config.batch_size,
            self.config.shuffle,
            self.config.seed,
            &device,
        )?;
        let mut val_loader =
            BatchLoader::new(val, self.config.val_batch_size, false, self.config.seed, &device)?;
        // keep the shuffle sequence aligned with an uninterrupted run
        for _ in 0..self.start_epoch {
            train_loader.epoch_order();
        }

        for epoch in self.start_epoch..self.config.epochs {
            let phase = self.scheduler.phase();
            let lr = self.scheduler.learning_rate();
            self.optimizer.set_learning_rate(lr);

            let train_pass = self.train_epoch(epoch, &mut train_loader)?;
            let val_report: EvalReport = evaluate_with_loss(
                self.model,
                &mut val_loader,
                &self.loss,
                self.config.decision_threshold,
            )?;
            self.scheduler.step();

            let entry = HistoryEntry {
                epoch,
                phase,
                learning_rate: lr,
                train_loss: train_pass.loss,
                val_loss: val_report.loss,
                train_accuracy: train_pass.metrics.accuracy,
                train_f1: train_pass.metrics.f1,
                val_accuracy: val_report.metrics.accuracy,
                val_precision: val_report.metrics.precision,
                val_recall: val_report.metrics.recall,
                val_f1: val_report.metrics.f1,
            };
            tracing::info!(
                epoch = epoch + 1,
                of = self.config.epochs,
                phase = phase.label(),
                lr,
                train_loss = entry.train_loss,
                val_loss = entry.val_loss,
                train_f1 = entry.train_f1,
                val_f1 = entry.val_f1,
                "epoch complete"
            );
            if self.state.record(entry) {
                tracing::info!(epoch, f1 = val_report.metrics.f1, "new best validation F1");
                save_best(
                    &self.config.best_checkpoint,
                    self.model,
                    &self.optimizer,
                    epoch,
                    &val_report.metrics,
                )?;
            }
        }

        save_final(
            &self.config.final_checkpoint,
            self.model,
            &self.optimizer,
            self.config.epochs - 1,
            &self.state,
        )?;
        tracing::info!(
            best_f1 = self.state.best_f1(),
            best_epoch = ?self.state.best_epoch(),
            "training finished"
        );
        Ok(self.state)
    }

    fn train_epoch<D: PairDataset + ?Sized>(
        &mut self,
        epoch: usize,
        loader: &mut BatchLoader<'_, D>,
    ) -> Result<TrainPass, SigError> {
        let mut predictions = Vec::with_capacity(loader.dataset_len());
        let mut labels = Vec::with_capacity(loader.dataset_len());
        let mut loss_sum = 0f64;
        let mut batches = 0usize;

        for (i, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let logits = self
                .model
                .logits_t(&batch.reference, &batch.candidate, true)?;
            let loss = self.loss.forward_logits(&logits, &batch.labels)?;
            let mut grads = loss.backward()?;
            let grad_norm = clip_grad_norm(
                &self.optimizer.vars(),
                &mut grads,
                self.config.max_grad_norm,
            )?;
            self.optimizer.step(&grads)?;

            let loss_value = loss.to_scalar::<f32>()? as f64;
            let batch_labels = batch.labels.to_vec1::<f32>()?;
            if batch_labels.len() > 1 && batch_labels.iter().all(|&y| y == batch_labels[0]) {
                tracing::warn!(epoch, batch = i, "single-class training batch");
            }
            tracing::debug!(epoch, batch = i, loss = loss_value, grad_norm, "train step");

            loss_sum += loss_value;
            batches += 1;
            let p = candle_nn::ops::sigmoid(&logits.detach())?;
            predictions.extend(p.to_vec1::<f32>()?);
            labels.extend(batch_labels);
        }

        Ok(TrainPass {
            loss: loss_sum / batches.max(1) as f64,
            metrics: Metrics::compute(&predictions, &labels, self.config.decision_threshold)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(epoch: usize, val_f1: f64) -> HistoryEntry {
        HistoryEntry {
            epoch,
            phase: TrainingPhase::Main,
            learning_rate: 1e-4,
            train_loss: 0.5,
            val_loss: 0.5,
            train_accuracy: 0.5,
            train_f1: 0.5,
            val_accuracy: 0.5,
            val_precision: 0.5,
            val_recall: 0.5,
            val_f1,
        }
    }

    #[test]
    fn best_tracks_peak_not_last() {
        let mut state = TrainingState::new();
        let saved: Vec<bool> = [0.5, 0.7, 0.9, 0.8]
            .iter()
            .enumerate()
            .map(|(e, &f1)| state.record(entry(e, f1)))
            .collect();
        assert_eq!(saved, vec![true, true, true, false]);
        assert_eq!(state.best_f1(), 0.9);
        assert_eq!(state.best_epoch(), Some(2));
        assert_eq!(state.history().len(), 4);
    }

    #[test]
    fn ties_do_not_replace_best() {
        let mut state = TrainingState::new();
        assert!(state.record(entry(0, 0.6)));
        assert!(!state.record(entry(1, 0.6)));
        assert_eq!(state.best_epoch(), Some(0));
    }

    #[test]
    fn zero_f1_never_marks_best() {
        let mut state = TrainingState::new();
        assert!(!state.record(entry(0, 0.0)));
        assert_eq!(state.best_epoch(), None);
    }
}
