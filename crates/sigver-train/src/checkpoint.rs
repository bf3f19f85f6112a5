//! Safetensors checkpoints holding weights, optimizer moments and run metadata.
//!
//! Layout of one file:
//!
//! - `model.<name>`: every model variable, batch-norm statistics included
//! - `optimizer.m.<name>` / `optimizer.v.<name>`: AdamW moments
//! - header metadata key [`METADATA_KEY`]: JSON [`CheckpointMeta`]
//!
//! Files are written to `<path>.tmp` and renamed into place.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::Optimizer;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use sigver_core::SigError;
use sigver_model::{ModelConfig, SiameseViT};

use crate::metrics::Metrics;
use crate::optim::AdamW;
use crate::trainer::{HistoryEntry, TrainingState};

/// Header metadata key carrying the JSON description.
pub const METADATA_KEY: &str = "sigver.checkpoint";

const MODEL_PREFIX: &str = "model.";
const MOMENT1_PREFIX: &str = "optimizer.m.";
const MOMENT2_PREFIX: &str = "optimizer.v.";

/// Optimizer scalars stored next to the moment tensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerMeta {
    pub step: usize,
    pub learning_rate: f64,
}

/// What kind of snapshot a checkpoint is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointRecord {
    /// Written whenever validation F1 reaches a new maximum.
    Best {
        f1: f64,
        metrics: Metrics,
        confusion_matrix: [[usize; 2]; 2],
    },
    /// Written once after the last epoch.
    Final {
        best_f1: f64,
        best_epoch: Option<usize>,
        history: Vec<HistoryEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Zero-based index of the last completed epoch: `epochs − 1` in a final
    /// checkpoint. Resume continues at `epoch + 1`.
    pub epoch: usize,
    pub model_config: ModelConfig,
    pub optimizer: OptimizerMeta,
    #[serde(flatten)]
    pub record: CheckpointRecord,
}

/// A checkpoint read back from disk.
#[derive(Debug)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub model: HashMap<String, Tensor>,
    pub moment1: HashMap<String, Tensor>,
    pub moment2: HashMap<String, Tensor>,
}

/// Writes a checkpoint atomically.
pub fn save_checkpoint(
    path: impl AsRef<Path>,
    model: &SiameseViT,
    optimizer: &AdamW,
    meta: &CheckpointMeta,
) -> Result<(), SigError> {
    let path = path.as_ref();
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    {
        let data = match model.var_map().data().lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (name, var) in data.iter() {
            tensors.insert(format!("{MODEL_PREFIX}{name}"), var.as_tensor().clone());
        }
    }
    let (m, v) = optimizer.state_tensors();
    tensors.extend(m.into_iter().map(|(k, t)| (format!("{MOMENT1_PREFIX}{k}"), t)));
    tensors.extend(v.into_iter().map(|(k, t)| (format!("{MOMENT2_PREFIX}{k}"), t)));

    let json = serde_json::to_string(meta)
        .map_err(|e| SigError::checkpoint(format!("encode metadata: {e}")))?;
    let metadata = Some(HashMap::from([(METADATA_KEY.to_string(), json)]));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    safetensors::tensor::serialize_to_file(&tensors, &metadata, &tmp)
        .map_err(|e| SigError::checkpoint(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)?;
    tracing::info!(path = %path.display(), epoch = meta.epoch, tensors = tensors.len(), "saved checkpoint");
    Ok(())
}

/// Snapshot at a new best validation F1.
pub fn save_best(
    path: impl AsRef<Path>,
    model: &SiameseViT,
    optimizer: &AdamW,
    epoch: usize,
    metrics: &Metrics,
) -> Result<(), SigError> {
    let meta = CheckpointMeta {
        epoch,
        model_config: model.config().clone(),
        optimizer: optimizer_meta(optimizer),
        record: CheckpointRecord::Best {
            f1: metrics.f1,
            metrics: *metrics,
            confusion_matrix: metrics.confusion.as_array(),
        },
    };
    save_checkpoint(path, model, optimizer, &meta)
}

/// End-of-run snapshot with the complete history.
pub fn save_final(
    path: impl AsRef<Path>,
    model: &SiameseViT,
    optimizer: &AdamW,
    epoch: usize,
    state: &TrainingState,
) -> Result<(), SigError> {
    let meta = CheckpointMeta {
        epoch,
        model_config: model.config().clone(),
        optimizer: optimizer_meta(optimizer),
        record: CheckpointRecord::Final {
            best_f1: state.best_f1(),
            best_epoch: state.best_epoch(),
            history: state.history().to_vec(),
        },
    };
    save_checkpoint(path, model, optimizer, &meta)
}

/// Reads only the JSON header, without decoding tensors.
pub fn read_meta(path: impl AsRef<Path>) -> Result<CheckpointMeta, SigError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    decode_meta(&bytes, path)
}

/// Reads the whole checkpoint onto `device`.
pub fn read_checkpoint(path: impl AsRef<Path>, device: &Device) -> Result<Checkpoint, SigError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let meta = decode_meta(&bytes, path)?;
    let tensors = candle_core::safetensors::load_buffer(&bytes, device)
        .map_err(|e| SigError::checkpoint(format!("{}: {e}", path.display())))?;

    let mut model = HashMap::new();
    let mut moment1 = HashMap::new();
    let mut moment2 = HashMap::new();
    for (name, tensor) in tensors {
        if let Some(rest) = name.strip_prefix(MOMENT1_PREFIX) {
            moment1.insert(rest.to_string(), tensor);
        } else if let Some(rest) = name.strip_prefix(MOMENT2_PREFIX) {
            moment2.insert(rest.to_string(), tensor);
        } else if let Some(rest) = name.strip_prefix(MODEL_PREFIX) {
            model.insert(rest.to_string(), tensor);
        } else {
            return Err(SigError::checkpoint(format!(
                "{}: unexpected tensor {name}",
                path.display()
            )));
        }
    }
    Ok(Checkpoint {
        meta,
        model,
        moment1,
        moment2,
    })
}

/// Rebuilds a model from a checkpoint for inference.
///
/// # Errors
///
/// [`SigError::ConfigMismatch`] if the stored architecture differs from
/// `expected` or any tensor is missing, extra or mis-shaped.
pub fn load_model(
    path: impl AsRef<Path>,
    expected: &ModelConfig,
    device: &Device,
) -> Result<SiameseViT, SigError> {
    let path = path.as_ref();
    let checkpoint = read_checkpoint(path, device)?;
    check_config(&checkpoint.meta.model_config, expected)?;
    let model = SiameseViT::new(expected.clone(), device)?;
    copy_weights(&model, &checkpoint.model)?;
    tracing::info!(path = %path.display(), epoch = checkpoint.meta.epoch, "loaded model");
    Ok(model)
}

/// Copies checkpoint weights into `model`'s variables.
pub fn copy_weights(model: &SiameseViT, weights: &HashMap<String, Tensor>) -> Result<(), SigError> {
    let data = match model.var_map().data().lock() {
        Ok(data) => data,
        Err(poisoned) => poisoned.into_inner(),
    };
    if data.len() != weights.len() {
        return Err(SigError::ConfigMismatch {
            message: format!(
                "checkpoint has {} tensors, model has {}",
                weights.len(),
                data.len()
            ),
        });
    }
    for (name, var) in data.iter() {
        let tensor = weights.get(name).ok_or_else(|| SigError::ConfigMismatch {
            message: format!("missing tensor {name}"),
        })?;
        if tensor.shape() != var.shape() {
            return Err(SigError::ConfigMismatch {
                message: format!(
                    "tensor {name}: checkpoint {:?}, model {:?}",
                    tensor.dims(),
                    var.dims()
                ),
            });
        }
        var.set(&tensor.to_dtype(var.dtype())?.to_device(var.device())?)?;
    }
    Ok(())
}

/// Restores AdamW moments, step count and learning rate.
pub fn restore_optimizer(checkpoint: &Checkpoint, optimizer: &mut AdamW) -> Result<(), SigError> {
    optimizer.load_state(
        checkpoint.meta.optimizer.step,
        &checkpoint.moment1,
        &checkpoint.moment2,
    )?;
    optimizer.set_learning_rate(checkpoint.meta.optimizer.learning_rate);
    Ok(())
}

pub fn check_config(stored: &ModelConfig, expected: &ModelConfig) -> Result<(), SigError> {
    if stored == expected {
        Ok(())
    } else {
        Err(SigError::ConfigMismatch {
            message: format!("checkpoint {stored:?}, expected {expected:?}"),
        })
    }
}

fn optimizer_meta(optimizer: &AdamW) -> OptimizerMeta {
    OptimizerMeta {
        step: optimizer.step_count(),
        learning_rate: optimizer.learning_rate(),
    }
}

fn decode_meta(bytes: &[u8], path: &Path) -> Result<CheckpointMeta, SigError> {
    let (_, header) = SafeTensors::read_metadata(bytes)
        .map_err(|e| SigError::checkpoint(format!("{}: {e}", path.display())))?;
    let json = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| {
            SigError::checkpoint(format!("{}: no {METADATA_KEY} metadata", path.display()))
        })?;
    serde_json::from_str(json)
        .map_err(|e| SigError::checkpoint(format!("{}: bad metadata: {e}", path.display())))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
