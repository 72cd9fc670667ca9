//! Dataset module for relation-mention corpora
//!
//! This module provides functionality for:
//! - Loading JSON-lines corpora into per-mention examples
//! - Positional, indicator and piece features for each argument pair
//! - The word vocabulary and its pretrained embedding matrix
//! - Padded tensor batches and length-aware block shuffling
//!
//! ## Loading Modes
//!
//! Training-mode loading drops sentences longer than `max_sentence_len` and
//! mentions whose label is not in the label file. Evaluation-mode loading
//! keeps every mention so that dev/test scores stay comparable across runs.

pub mod batcher;
pub mod corpus;
pub mod features;
pub mod shuffle;
pub mod vocab;

// Re-export main types for convenience
pub use batcher::{batch_ranges, RelationBatch, RelationBatcher};
pub use corpus::{CorpusLoader, LabelMap, LoadMode, LoadStats};
pub use features::{ArgSpan, FeatureConfig, FeatureExtractor, RelationExample};
pub use shuffle::block_shuffle;
pub use vocab::{build_vocabulary, EmbeddingMatrix, TokenFrequencies, Vocabulary};
