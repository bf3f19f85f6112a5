//! # sigver-train
//!
//! Training, checkpointing and evaluation for the Siamese signature verifier.
//!
//! ## Key Components
//!
//! - [`TrainConfig`]: run hyperparameters (JSON loadable)
//! - [`dataset`]: pairing lists, [`PairDataset`] and the [`BatchLoader`]
//! - [`loss::CompositeLoss`]: BCE + margin-contrastive objective
//! - [`metrics::Metrics`]: thresholded accuracy / precision / recall / F1
//! - [`optim::AdamW`]: AdamW whose moments can be checkpointed
//! - [`Trainer`]: the epoch loop with warmup/cosine schedule and
//!   best-F1 checkpoint selection
//! - [`checkpoint`]: safetensors persistence, [`load_model`] for inference
//! - [`inference`]: [`evaluate`] and [`verify`]
//!
//! ## Architecture Rules
//!
//! - Depends on `sigver-core` and `sigver-model`.
//! - Single-threaded, synchronous; one batch at a time.
//! - Fail-fast: no retries anywhere.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod optim;
pub mod rng;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{load_model, read_checkpoint, read_meta, CheckpointMeta, CheckpointRecord};
pub use config::TrainConfig;
pub use dataset::{BatchLoader, FilePairDataset, InMemoryPairDataset, PairBatch, PairDataset, PairList};
pub use inference::{evaluate, verify, Verdict};
pub use metrics::{ConfusionMatrix, Metrics};
pub use schedule::{LrScheduler, TrainingPhase};
pub use trainer::{HistoryEntry, Trainer, TrainingState};

pub use sigver_core;
pub use sigver_model;
