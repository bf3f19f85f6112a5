use candle_core::Device;
use candle_nn::Optimizer;
use sigver_core::{Label, SigError, SignatureImage, SignaturePair};
use sigver_model::{ModelConfig, SiameseViT};
use sigver_train::checkpoint::{save_best, CheckpointRecord};
use sigver_train::metrics::ConfusionMatrix;
use sigver_train::optim::{AdamW, AdamWParams};
use sigver_train::{
    load_model, read_meta, BatchLoader, InMemoryPairDataset, Metrics, TrainConfig, Trainer,
    TrainingPhase, TrainingState,
};

fn small_model() -> ModelConfig {
    ModelConfig {
        image_height: 32,
        image_width: 64,
        patch_height: 16,
        patch_width: 32,
        embed_dim: 8,
        depth: 1,
        num_heads: 2,
        mlp_ratio: 2.0,
        conv_feature_dim: 6,
        comparator_hidden: 8,
        ..ModelConfig::default()
    }
}

fn toy_dataset(config: &ModelConfig) -> InMemoryPairDataset {
    let (h, w) = (config.image_height, config.image_width);
    let pair = |a: f32, b: f32, label| SignaturePair {
        reference: SignatureImage::filled(h, w, a),
        candidate: SignatureImage::filled(h, w, b),
        label,
    };
    InMemoryPairDataset::new(vec![
        pair(0.5, 0.5, Label::Authentic),
        pair(-0.5, -0.4, Label::Authentic),
        pair(0.5, -0.9, Label::Forged),
        pair(-0.2, 0.8, Label::Forged),
    ])
}

fn toy_config(dir: &std::path::Path, epochs: usize) -> TrainConfig {
    TrainConfig {
        model: small_model(),
        epochs,
        warmup_epochs: 1,
        batch_size: 2,
        val_batch_size: 2,
        learning_rate: 1e-3,
        best_checkpoint: dir.join("best.safetensors"),
        final_checkpoint: dir.join("final.safetensors"),
        ..TrainConfig::default()
    }
}

#[test]
fn three_epochs_produce_three_history_entries() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 3);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let data = toy_dataset(&config.model);

    let state = Trainer::new(&model, config.clone())
        .unwrap()
        .fit(&data, &data)
        .unwrap();

    let history = state.history();
    assert_eq!(history.len(), 3);
    let phases: Vec<TrainingPhase> = history.iter().map(|h| h.phase).collect();
    assert_eq!(
        phases,
        vec![TrainingPhase::Warmup, TrainingPhase::Main, TrainingPhase::Main]
    );
    assert!((history[0].learning_rate - 1e-4).abs() < 1e-12);
    assert!((history[1].learning_rate - 1e-3).abs() < 1e-12);
    let mid = 1e-6 + (1e-3 - 1e-6) * 0.5;
    assert!((history[2].learning_rate - mid).abs() < 1e-12);
    for (i, h) in history.iter().enumerate() {
        assert_eq!(h.epoch, i);
        assert!(h.train_loss.is_finite() && h.val_loss.is_finite());
        assert!((0.0..=1.0).contains(&h.val_f1));
    }

    let meta = read_meta(&config.final_checkpoint).unwrap();
    assert_eq!(meta.epoch, 2);
    match meta.record {
        CheckpointRecord::Final {
            history, best_f1, ..
        } => {
            assert_eq!(history.len(), 3);
            assert_eq!(best_f1, state.best_f1());
        }
        other => panic!("expected final checkpoint, got {other:?}"),
    }
    assert!(!dir.path().join("final.safetensors.tmp").exists());
}

#[test]
fn empty_training_set_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 1);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let empty = InMemoryPairDataset::default();
    let err = Trainer::new(&model, config)
        .unwrap()
        .fit(&empty, &empty)
        .unwrap_err();
    assert!(matches!(err, SigError::Dataset { .. }));
}

#[test]
fn checkpoint_roundtrip_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 1);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let data = toy_dataset(&config.model);
    let state = Trainer::new(&model, config.clone())
        .unwrap()
        .fit(&data, &data)
        .unwrap();
    assert_eq!(state.history().len(), 1);

    let restored = load_model(&config.final_checkpoint, &config.model, &Device::Cpu).unwrap();
    let mut loader = BatchLoader::new(&data, 4, false, 0, &Device::Cpu).unwrap();
    let batch = loader.epoch().next().unwrap().unwrap();
    let before = model
        .predict(&batch.reference, &batch.candidate)
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    let after = restored
        .predict(&batch.reference, &batch.candidate)
        .unwrap()
        .to_vec1::<f32>()
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn loading_into_other_architecture_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 1);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let data = toy_dataset(&config.model);
    Trainer::new(&model, config.clone())
        .unwrap()
        .fit(&data, &data)
        .unwrap();

    let other = ModelConfig {
        comparator_hidden: 16,
        ..small_model()
    };
    let err = load_model(&config.final_checkpoint, &other, &Device::Cpu).unwrap_err();
    assert!(matches!(err, SigError::ConfigMismatch { .. }));
}

#[test]
fn best_checkpoint_keeps_peak_f1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best.safetensors");
    let model = SiameseViT::new(small_model(), &Device::Cpu).unwrap();
    let optimizer = AdamW::from_var_map(model.var_map(), AdamWParams::default()).unwrap();

    let mut state = TrainingState::new();
    for (epoch, f1) in [0.5, 0.7, 0.9, 0.8].into_iter().enumerate() {
        let metrics = Metrics {
            f1,
            ..Metrics::from_confusion(ConfusionMatrix::default())
        };
        let entry = sigver_train::HistoryEntry {
            epoch,
            phase: TrainingPhase::Main,
            learning_rate: 1e-4,
            train_loss: 0.1,
            val_loss: 0.1,
            train_accuracy: 0.5,
            train_f1: 0.5,
            val_accuracy: 0.5,
            val_precision: 0.5,
            val_recall: 0.5,
            val_f1: f1,
        };
        if state.record(entry) {
            save_best(&path, &model, &optimizer, epoch, &metrics).unwrap();
        }
    }

    let meta = read_meta(&path).unwrap();
    assert_eq!(meta.epoch, 2);
    match meta.record {
        CheckpointRecord::Best { f1, .. } => assert_eq!(f1, 0.9),
        other => panic!("expected best checkpoint, got {other:?}"),
    }
}

#[test]
fn resume_continues_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 2);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let data = toy_dataset(&config.model);
    let first = Trainer::new(&model, config.clone())
        .unwrap()
        .fit(&data, &data)
        .unwrap();
    assert_eq!(first.history().len(), 2);

    let resumed_from = dir.path().join("after_two.safetensors");
    std::fs::copy(&config.final_checkpoint, &resumed_from).unwrap();
    let longer = TrainConfig {
        epochs: 3,
        ..config
    };
    let fresh = SiameseViT::new(longer.model.clone(), &Device::Cpu).unwrap();
    let trainer = Trainer::resume(&fresh, longer, &resumed_from).unwrap();
    assert!(trainer.optimizer().step_count() > 0);
    assert!((trainer.optimizer().learning_rate() - 1e-3).abs() < 1e-12);
    let state = trainer.fit(&data, &data).unwrap();
    assert_eq!(state.history().len(), 3);
    assert_eq!(state.history()[2].epoch, 2);
}

#[test]
fn resume_refuses_best_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = toy_config(dir.path(), 4);
    let model = SiameseViT::new(config.model.clone(), &Device::Cpu).unwrap();
    let optimizer = AdamW::from_var_map(model.var_map(), AdamWParams::default()).unwrap();
    let metrics = Metrics {
        f1: 0.9,
        ..Metrics::from_confusion(ConfusionMatrix::default())
    };
    save_best(&config.best_checkpoint, &model, &optimizer, 2, &metrics).unwrap();

    let result = Trainer::resume(&model, config.clone(), &config.best_checkpoint);
    assert!(matches!(result, Err(SigError::Checkpoint { .. })));
    // the peak checkpoint is left untouched
    match read_meta(&config.best_checkpoint).unwrap().record {
        CheckpointRecord::Best { f1, .. } => assert_eq!(f1, 0.9),
        other => panic!("expected best checkpoint, got {other:?}"),
    }
}

#[test]
fn evaluate_counts_every_pair() {
    let model = SiameseViT::new(small_model(), &Device::Cpu).unwrap();
    let data = toy_dataset(&small_model());
    let mut loader = BatchLoader::new(&data, 3, false, 0, &Device::Cpu).unwrap();
    let metrics = sigver_train::evaluate(&model, &mut loader, 0.5).unwrap();
    assert_eq!(metrics.confusion.total(), 4);
}

#[test]
fn verify_reports_confidence() {
    let model = SiameseViT::new(small_model(), &Device::Cpu).unwrap();
    let a = SignatureImage::filled(32, 64, 0.1);
    let b = SignatureImage::filled(32, 64, 0.2);
    let verdict = sigver_train::verify(&model, &a, &b, 0.5).unwrap();
    assert!((0.0..=1.0).contains(&verdict.confidence));
    assert_eq!(verdict.authentic, verdict.confidence > 0.5);
}
