//! Error Handling Module
//!
//! Defines the error type shared by the whole relation-extraction pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for relation extraction operations
#[derive(Error, Debug)]
pub enum RelExtError {
    /// Argument indices fall outside the sentence's token range
    #[error("Invalid argument span {start}..={end} for a sentence of {len} tokens")]
    InvalidSpan { start: usize, end: usize, len: usize },

    /// Batch construction was asked to build from zero examples
    #[error("Cannot build a batch from an empty example list")]
    EmptyBatch,

    /// A relation name that is not part of the label map
    #[error("Relation label not found: {0}")]
    LabelNotFound(String),

    /// Malformed corpus record
    #[error("Corpus error at line {line}: {message}")]
    Corpus { line: usize, message: String },

    /// Vocabulary or embedding problems
    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Saving or restoring a checkpoint failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RelExtError {
    fn from(err: serde_json::Error) -> Self {
        RelExtError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RelExtError {
    fn from(err: toml::de::Error) -> Self {
        RelExtError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RelExtError {
    fn from(err: toml::ser::Error) -> Self {
        RelExtError::Serialization(err.to_string())
    }
}

/// Convenience Result type for relation extraction operations
pub type Result<T> = std::result::Result<T, RelExtError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| RelExtError::Serialization(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| RelExtError::Serialization(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| RelExtError::Model(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| RelExtError::Model(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelExtError::LabelNotFound("/people/person/place_lived".to_string());
        assert_eq!(
            format!("{}", err),
            "Relation label not found: /people/person/place_lived"
        );
    }

    #[test]
    fn test_invalid_span_mentions_bounds() {
        let err = RelExtError::InvalidSpan { start: 3, end: 7, len: 4 };
        let msg = format!("{}", err);
        assert!(msg.contains("3..=7"));
        assert!(msg.contains("4 tokens"));
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: RelExtError = parsed.unwrap_err().into();
        assert!(matches!(err, RelExtError::Serialization(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read embeddings");
        assert!(with_context.unwrap_err().to_string().contains("Failed to read embeddings"));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.context("Value was None");
        assert!(with_context.is_err());
    }
}
