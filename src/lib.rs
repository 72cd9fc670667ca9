//! # Relation Extraction with Mean-Teacher Self-Filtering
//!
//! A Rust library for sentence-level relation classification on distantly
//! supervised, partially noisy corpora, built on the Burn framework.
//!
//! ## Features
//!
//! - **Mean teacher** training: a student network plus an EMA teacher tied together by a
//!   consistency loss
//! - **Self-filtering** of noisy labels: after every epoch the teacher keeps only mentions
//!   whose gold label is in its top-K
//! - **Four scorers**: CNN, piecewise CNN, entity attention and BiGRU with word attention
//! - **Evaluation** with dev-tuned thresholds, PR curves and AUC, optionally over an ensemble
//!
//! ## Modules
//!
//! - `dataset`: Corpus loading, feature extraction, vocabulary and batching
//! - `model`: Scorer architectures built with Burn
//! - `training`: Mean-teacher loop, EMA, filtering and checkpoints
//! - `inference`: Prediction, ensembling and the test workflow
//! - `utils`: Logging, metrics, and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relext_ssl::backend::{default_device, TrainingBackend};
//! use relext_ssl::config::ExperimentConfig;
//! use relext_ssl::training::run_training;
//!
//! let config = ExperimentConfig::load("experiment.toml".as_ref())?;
//! let summary = run_training::<TrainingBackend>(&config, &default_device())?;
//! println!("best dev F1 {:.3} at epoch {}", summary.best_dev_f1, summary.best_epoch);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ExperimentConfig, TrainingMode};
pub use dataset::{LabelMap, RelationBatch, RelationBatcher, RelationExample, Vocabulary};
pub use inference::{run_evaluation, EvaluationReport};
pub use model::{Architecture, ModelConfig, RelationClassifier, Scorer};
pub use training::{run_training, MeanTeacherTrainer, TrainingSummary};
pub use utils::error::{RelExtError, Result};
pub use utils::metrics::PrfScore;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
