//! sigver server entry point.

use std::path::PathBuf;

use anyhow::Context;
use candle_core::Device;
use clap::Parser;
use sigver_core::DECISION_THRESHOLD;
use sigver_model::ModelConfig;
use sigver_server::state::AppState;
use sigver_train::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "sigver-server", about = "Signature verification HTTP server")]
struct Args {
    /// Checkpoint to serve. Without it `/api/verify` answers 503.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory request image paths are resolved against. Without it the
    /// server opens any path a client sends.
    #[arg(long)]
    image_root: Option<PathBuf>,

    /// Confidence above which a candidate is called authentic.
    #[arg(long, default_value_t = DECISION_THRESHOLD)]
    threshold: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let state = match &args.checkpoint {
        Some(path) => {
            let device = Device::cuda_if_available(0)?;
            AppState::from_checkpoint(
                path,
                &ModelConfig::default(),
                &device,
                args.threshold,
                args.image_root.clone(),
            )
            .with_context(|| format!("loading {}", path.display()))?
        }
        None => {
            tracing::warn!("no --checkpoint given; verification is disabled");
            AppState::empty()
        }
    };
    if args.image_root.is_none() {
        tracing::warn!("no --image-root given; clients may read any server-side image path");
    }
    let app = sigver_server::build_app_with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind to {}", args.bind))?;
    tracing::info!(addr = %args.bind, "sigver server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
