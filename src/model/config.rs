//! Model Configuration Module
//!
//! Hyperparameters shared by all scorer architectures, plus the architecture
//! selector itself.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Available scorer architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Architecture {
    /// Masked convolution with max-pooling over time
    Cnn,
    /// Convolution pooled separately over the three sentence pieces
    Pcnn,
    /// Convolution plus two argument-conditioned attention readouts
    EntityAttention,
    /// Bidirectional GRU with word attention feeding piecewise pooling
    Bgwa,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Architecture::Cnn => "cnn",
            Architecture::Pcnn => "pcnn",
            Architecture::EntityAttention => "entity-attention",
            Architecture::Bgwa => "bgwa",
        };
        write!(f, "{}", name)
    }
}

/// Configuration for the relation scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Which scorer to build
    pub architecture: Architecture,

    /// Word embedding width
    pub word_embed_dim: usize,

    /// Width of each distance-bucket embedding
    pub distance_embed_dim: usize,

    /// Convolution filters
    pub num_filters: usize,

    /// Convolution kernel width (odd, same padding)
    pub kernel_size: usize,

    /// Dropout before the output layer
    pub dropout_rate: f64,

    /// Also apply dropout to the embedding layers
    pub embed_dropout: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Bgwa,
            word_embed_dim: 50,
            distance_embed_dim: 5,
            num_filters: 230,
            kernel_size: 3,
            dropout_rate: 0.5,
            embed_dropout: false,
        }
    }
}

impl ModelConfig {
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            ..Default::default()
        }
    }

    /// Width of the concatenated token representation (word + 2 distances)
    pub fn input_dim(&self) -> usize {
        self.word_embed_dim + 2 * self.distance_embed_dim
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.word_embed_dim == 0 || self.distance_embed_dim == 0 {
            return Err("embedding dimensions must be greater than 0".to_string());
        }

        if self.num_filters == 0 {
            return Err("num_filters must be greater than 0".to_string());
        }

        if self.kernel_size < 1 || self.kernel_size % 2 == 0 {
            return Err("kernel_size must be a positive odd number".to_string());
        }

        if self.dropout_rate < 0.0 || self.dropout_rate >= 1.0 {
            return Err("dropout_rate must be in range [0.0, 1.0)".to_string());
        }

        Ok(())
    }
}
