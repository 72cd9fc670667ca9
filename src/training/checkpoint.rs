//! Checkpoint persistence
//!
//! A checkpoint directory holds the model record (`model.mpk.gz`, written by
//! Burn's `CompactRecorder`) and a JSON sidecar (`model.json`) describing how
//! the model was built, so inference can rebuild an identical scorer.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainingMode;
use crate::dataset::features::FeatureConfig;
use crate::model::config::ModelConfig;
use crate::model::layers::ScorerDims;
use crate::utils::error::{RelExtError, Result};

const MODEL_STEM: &str = "model";
const METADATA_FILE: &str = "model.json";

/// Everything needed to rebuild and describe a saved model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// 1-based epoch that produced the weights
    pub epoch: usize,
    /// Seed the epoch ran with
    pub seed: u64,
    pub dev_f1: f64,
    pub mode: TrainingMode,
    pub model: ModelConfig,
    pub features: FeatureConfig,
    pub num_labels: usize,
    pub vocab_size: usize,
    pub saved_at: DateTime<Local>,
}

impl CheckpointMetadata {
    /// Scorer dimensions recorded at save time
    pub fn dims(&self) -> ScorerDims {
        ScorerDims {
            vocab_size: self.vocab_size,
            distance_vocab_size: self.features.distance_vocab_size(),
            num_labels: self.num_labels,
        }
    }
}

/// A checkpoint directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record path without extension; the recorder appends `.mpk.gz`
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_STEM)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn exists(&self) -> bool {
        self.metadata_path().exists() && self.dir.join(format!("{MODEL_STEM}.mpk.gz")).exists()
    }

    /// Overwrite the stored model and its metadata
    pub fn save<B: Backend, M: Module<B>>(&self, model: M, metadata: &CheckpointMetadata) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let recorder = CompactRecorder::new();
        model
            .save_file(self.model_path(), &recorder)
            .map_err(|e| RelExtError::Checkpoint(format!("failed to save model: {:?}", e)))?;
        fs::write(self.metadata_path(), serde_json::to_string_pretty(metadata)?)?;

        info!(
            "Checkpoint saved to {} (epoch {}, dev F1 {:.3})",
            self.dir.display(),
            metadata.epoch,
            metadata.dev_f1
        );
        Ok(())
    }

    pub fn load_metadata(&self) -> Result<CheckpointMetadata> {
        let path = self.metadata_path();
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Load stored weights into an architecturally identical `model`
    pub fn load_model<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        info!("Loading checkpoint from {}", self.dir.display());
        let recorder = CompactRecorder::new();
        model
            .load_file(self.model_path(), &recorder, device)
            .map_err(|e| RelExtError::Checkpoint(format!("failed to load model: {:?}", e)))
    }
}
