//! Inference module for scoring, ensembling and test-time evaluation
//!
//! This module provides:
//! - Batched softmax scoring on a non-autodiff backend
//! - Element-wise score averaging across checkpoints
//! - Prediction files grouped by source sentence
//! - The `test`/`ensemble` workflow: dev threshold search, test report,
//!   PR curve and AUC

pub mod predictor;
pub mod runner;

// Re-export main types for convenience
pub use predictor::{average_scores, predict, write_predictions, NO_RELATION};
pub use runner::{load_model, run_evaluation, EvaluationReport, LoadedModel};
