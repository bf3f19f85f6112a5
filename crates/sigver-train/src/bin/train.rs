//! Training CLI for the sigver signature verifier.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release -p sigver-train --bin train -- \
//!   --train-pairs data/train_pairs.csv \
//!   --val-pairs data/test_pairs.csv \
//!   --images data/signatures \
//!   --epochs 50 --batch-size 32 --lr 1e-4
//! ```
//!
//! Pairing lists have one header row followed by `img1,img2,label` rows with
//! paths relative to `--images`. Set `RUST_LOG=debug` for per-batch output.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use sigver_model::SiameseViT;
use sigver_train::logging::init_tracing;
use sigver_train::{FilePairDataset, PairList, TrainConfig, Trainer};

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the Siamese signature verifier")]
struct Args {
    /// Training pairing list (CSV).
    #[arg(long)]
    train_pairs: PathBuf,

    /// Validation pairing list (CSV).
    #[arg(long)]
    val_pairs: PathBuf,

    /// Directory the pairing-list paths are relative to.
    #[arg(long)]
    images: PathBuf,

    /// JSON training config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    warmup_epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Output path of the best-F1 checkpoint.
    #[arg(long)]
    best_checkpoint: Option<PathBuf>,

    /// Output path of the end-of-run checkpoint.
    #[arg(long)]
    final_checkpoint: Option<PathBuf>,

    /// Continue from a final checkpoint.
    #[arg(long)]
    resume: Option<PathBuf>,
}

impl Args {
    fn train_config(&self) -> anyhow::Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.warmup_epochs {
            config.warmup_epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
            config.val_batch_size = v;
        }
        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = &self.best_checkpoint {
            config.best_checkpoint = v.clone();
        }
        if let Some(v) = &self.final_checkpoint {
            config.final_checkpoint = v.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.train_config()?;

    let device = Device::cuda_if_available(0)?;
    tracing::info!(device = ?device, "selected device");

    let (h, w) = (config.model.image_height, config.model.image_width);
    let train = FilePairDataset::new(
        PairList::from_csv(&args.train_pairs, &args.images)
            .with_context(|| format!("reading {}", args.train_pairs.display()))?,
        h,
        w,
    );
    let val = FilePairDataset::new(
        PairList::from_csv(&args.val_pairs, &args.images)
            .with_context(|| format!("reading {}", args.val_pairs.display()))?,
        h,
        w,
    );
    tracing::info!(
        train = sigver_train::PairDataset::len(&train),
        val = sigver_train::PairDataset::len(&val),
        "pairing lists loaded"
    );

    let model = SiameseViT::new(config.model.clone(), &device)?;
    tracing::info!(model = ?model, "model built");

    let start = Instant::now();
    let trainer = match &args.resume {
        Some(path) => Trainer::resume(&model, config.clone(), path)?,
        None => Trainer::new(&model, config.clone())?,
    };
    let state = trainer.fit(&train, &val)?;

    tracing::info!(
        elapsed_s = start.elapsed().as_secs_f32(),
        best_f1 = state.best_f1(),
        best_epoch = ?state.best_epoch(),
        best = %config.best_checkpoint.display(),
        last = %config.final_checkpoint.display(),
        "done"
    );
    Ok(())
}
