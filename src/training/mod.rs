//! Training module for mean-teacher relation extraction
//!
//! This module provides:
//! - The epoch loop with AdaGrad, gradient clipping and early stopping
//! - Exponential moving average updates from student to teacher
//! - Top-K self-filtering of noisy training labels
//! - Checkpoint persistence and the end-to-end training run
//!
//! ## Mean Teacher
//!
//! Each batch is scored by the student and by the teacher, whose output
//! is detached from the graph. The loss adds a squared-error consistency term
//! between their softmax outputs to the supervised NLL. After every
//! optimizer step the teacher tracks the student through an EMA whose
//! decay ramps up over the first epochs. Once an epoch ends,
//! the teacher re-scores the original training set and mentions whose gold
//! label falls outside its top-K are dropped from the next epoch.

pub mod checkpoint;
pub mod ema;
pub mod filter;
pub mod grad_clip;
pub mod runner;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{CheckpointMetadata, CheckpointStore};
pub use ema::{apply_ema, rampup_decay, EmaStats, NamedParameters};
pub use filter::{filter_examples, FilterReport};
pub use grad_clip::{clip_grad_norm, global_grad_norm};
pub use runner::{prepare_data, run_training, PreparedData};
pub use trainer::{
    EpochRecord, MeanTeacherTrainer, TrainingData, TrainingState, TrainingSummary,
};
