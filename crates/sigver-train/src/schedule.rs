//! Epoch-indexed learning-rate schedule: linear warmup then cosine decay.

use serde::{Deserialize, Serialize};

/// Which scheduler governs an epoch. Purely a function of the epoch index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Warmup,
    Main,
}

impl TrainingPhase {
    pub fn for_epoch(epoch: usize, warmup_epochs: usize) -> Self {
        if epoch < warmup_epochs {
            Self::Warmup
        } else {
            Self::Main
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Main => "main",
        }
    }
}

/// Two-phase schedule stepped once per epoch.
///
/// # Example
///
/// ```
/// use sigver_train::schedule::{LrScheduler, TrainingPhase};
///
/// let mut sched = LrScheduler::new(1e-3, 0.1, 1e-6, 2, 10);
/// assert_eq!(sched.phase(), TrainingPhase::Warmup);
/// assert!((sched.learning_rate() - 1e-4).abs() < 1e-12);
/// sched.step();
/// sched.step();
/// assert_eq!(sched.phase(), TrainingPhase::Main);
/// assert!((sched.learning_rate() - 1e-3).abs() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct LrScheduler {
    base_lr: f64,
    start_factor: f64,
    min_lr: f64,
    warmup_epochs: usize,
    total_epochs: usize,
    epoch: usize,
}

impl LrScheduler {
    pub fn new(
        base_lr: f64,
        start_factor: f64,
        min_lr: f64,
        warmup_epochs: usize,
        total_epochs: usize,
    ) -> Self {
        Self {
            base_lr,
            start_factor,
            min_lr,
            warmup_epochs,
            total_epochs,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn phase(&self) -> TrainingPhase {
        TrainingPhase::for_epoch(self.epoch, self.warmup_epochs)
    }

    /// Rate in effect for the current epoch.
    pub fn learning_rate(&self) -> f64 {
        self.rate_at(self.epoch)
    }

    pub fn rate_at(&self, epoch: usize) -> f64 {
        match TrainingPhase::for_epoch(epoch, self.warmup_epochs) {
            TrainingPhase::Warmup => {
                let progress = epoch as f64 / self.warmup_epochs as f64;
                self.base_lr * (self.start_factor + (1.0 - self.start_factor) * progress)
            }
            TrainingPhase::Main => {
                let span = self.total_epochs.saturating_sub(self.warmup_epochs).max(1);
                let t = ((epoch - self.warmup_epochs) as f64 / span as f64).min(1.0);
                let cosine = 0.5 * (1.0 + (std::f64::consts::PI * t).cos());
                self.min_lr + (self.base_lr - self.min_lr) * cosine
            }
        }
    }

    /// Advances to the next epoch.
    pub fn step(&mut self) {
        self.epoch += 1;
    }

    /// Jumps to `epoch`, used when resuming.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_is_epoch_driven() {
        assert_eq!(TrainingPhase::for_epoch(0, 2), TrainingPhase::Warmup);
        assert_eq!(TrainingPhase::for_epoch(1, 2), TrainingPhase::Warmup);
        assert_eq!(TrainingPhase::for_epoch(2, 2), TrainingPhase::Main);
        assert_eq!(TrainingPhase::for_epoch(0, 0), TrainingPhase::Main);
    }

    #[test]
    fn warmup_ramps_linearly() {
        let s = LrScheduler::new(1.0, 0.1, 0.0, 4, 10);
        assert!((s.rate_at(0) - 0.1).abs() < 1e-12);
        assert!((s.rate_at(2) - 0.55).abs() < 1e-12);
        assert!(s.rate_at(3) < s.rate_at(4));
    }

    #[test]
    fn cosine_decays_to_floor() {
        let s = LrScheduler::new(1.0, 0.1, 0.01, 2, 12);
        assert!((s.rate_at(2) - 1.0).abs() < 1e-12);
        assert!((s.rate_at(7) - (0.01 + 0.99 * 0.5)).abs() < 1e-12);
        assert!((s.rate_at(12) - 0.01).abs() < 1e-12);
        assert!((s.rate_at(40) - 0.01).abs() < 1e-12);
        for e in 2..12 {
            assert!(s.rate_at(e + 1) <= s.rate_at(e));
        }
    }

    #[test]
    fn step_advances_phase() {
        let mut s = LrScheduler::new(1e-4, 0.1, 1e-6, 1, 3);
        assert_eq!(s.phase(), TrainingPhase::Warmup);
        s.step();
        assert_eq!(s.phase(), TrainingPhase::Main);
        assert_eq!(s.epoch(), 1);
    }
}
