//! Verifies one candidate signature against a reference.
//!
//! ```bash
//! cargo run --release -p sigver-train --bin verify -- \
//!   --checkpoint best_model.safetensors reference.png candidate.png
//! ```

use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use sigver_core::{SignatureImage, DECISION_THRESHOLD};
use sigver_model::ModelConfig;
use sigver_train::logging::init_tracing;
use sigver_train::{load_model, verify};

#[derive(Parser, Debug)]
#[command(name = "verify", about = "Compare a candidate signature with a reference")]
struct Args {
    /// Trusted reference signature image.
    reference: PathBuf,

    /// Signature under examination.
    candidate: PathBuf,

    /// Checkpoint produced by `train`.
    #[arg(long, default_value = "best_model.safetensors")]
    checkpoint: PathBuf,

    /// Confidence above which the candidate is called authentic.
    #[arg(long, default_value_t = DECISION_THRESHOLD)]
    threshold: f32,

    /// Print the verdict as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = ModelConfig::default();
    let device = Device::cuda_if_available(0)?;

    let model = load_model(&args.checkpoint, &config, &device)
        .with_context(|| format!("loading {}", args.checkpoint.display()))?;
    let reference =
        SignatureImage::from_path(&args.reference, config.image_height, config.image_width)?;
    let candidate =
        SignatureImage::from_path(&args.candidate, config.image_height, config.image_width)?;

    let verdict = verify(&model, &reference, &candidate, args.threshold)?;
    if args.json {
        println!("{}", serde_json::to_string(&verdict)?);
    } else {
        let label = if verdict.authentic { "AUTHENTIC" } else { "FORGED" };
        println!("{label} (confidence {:.1}%)", verdict.confidence * 100.0);
    }
    Ok(())
}
