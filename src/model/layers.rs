//! Building blocks shared by the scorers

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig, PaddingConfig1d,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor, TensorData},
};

use crate::dataset::batcher::RelationBatch;
use crate::dataset::vocab::EmbeddingMatrix;
use crate::model::config::ModelConfig;
use crate::utils::error::{RelExtError, Result};

/// Additive penalty that removes masked positions from max/softmax
const MASK_PENALTY: f64 = 1e9;

/// Sizes that depend on the data rather than on hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScorerDims {
    pub vocab_size: usize,
    pub distance_vocab_size: usize,
    pub num_labels: usize,
}

/// Word + two distance-bucket embeddings, concatenated per token
#[derive(Module, Debug)]
pub struct TokenEmbedder<B: Backend> {
    words: Embedding<B>,
    arg1_distance: Embedding<B>,
    arg2_distance: Embedding<B>,
    dropout: Option<Dropout>,
}

impl<B: Backend> TokenEmbedder<B> {
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        let mut words = EmbeddingConfig::new(dims.vocab_size, config.word_embed_dim).init(device);
        if let Some(matrix) = pretrained {
            if matrix.dim != config.word_embed_dim || matrix.rows() != dims.vocab_size {
                return Err(RelExtError::Model(format!(
                    "embedding matrix is {}x{}, model expects {}x{}",
                    matrix.rows(),
                    matrix.dim,
                    dims.vocab_size,
                    config.word_embed_dim
                )));
            }
            let weight = Tensor::<B, 2>::from_data(
                TensorData::new(matrix.values.clone(), [matrix.rows(), matrix.dim]),
                device,
            );
            words.weight = Param::from_tensor(weight);
        }

        let distance = EmbeddingConfig::new(dims.distance_vocab_size, config.distance_embed_dim);
        Ok(Self {
            words,
            arg1_distance: distance.init(device),
            arg2_distance: distance.init(device),
            dropout: config
                .embed_dropout
                .then(|| DropoutConfig::new(config.dropout_rate).init()),
        })
    }

    /// `[batch, len, word_dim + 2 * distance_dim]`
    pub fn forward(&self, batch: &RelationBatch<B>) -> Tensor<B, 3> {
        let words = self.regularize(self.words.forward(batch.words.clone()));
        let dist1 = self.regularize(self.arg1_distance.forward(batch.arg1_distance.clone()));
        let dist2 = self.regularize(self.arg2_distance.forward(batch.arg2_distance.clone()));
        Tensor::cat(vec![words, dist1, dist2], 2)
    }

    /// Word embeddings for a `[batch, n]` id tensor
    pub fn embed_words(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.regularize(self.words.forward(ids))
    }

    fn regularize(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

/// Masked 1-D convolution over time with max pooling readouts
#[derive(Module, Debug)]
pub struct MaskedConv<B: Backend> {
    conv: Conv1d<B>,
}

impl<B: Backend> MaskedConv<B> {
    pub fn new(input_dim: usize, num_filters: usize, kernel_size: usize, device: &B::Device) -> Self {
        let conv = Conv1dConfig::new(input_dim, num_filters, kernel_size)
            .with_padding(PaddingConfig1d::Explicit((kernel_size - 1) / 2))
            .init(device);
        Self { conv }
    }

    /// Zero out padded tokens and convolve: `[b, l, d]` -> `[b, filters, l]`
    pub fn features(&self, input: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let masked = input * mask.unsqueeze_dim::<3>(2);
        self.conv.forward(masked.swap_dims(1, 2))
    }

    /// `tanh(max_t conv(x))`, `[b, filters]`
    pub fn forward_max(&self, input: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        self.features(input, mask)
            .max_dim(2)
            .squeeze::<2>(2)
            .tanh()
    }

    /// Max-pool separately inside each piece, `[b, 3 * filters]`
    pub fn forward_piecewise(
        &self,
        input: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        pieces: [Tensor<B, 2>; 3],
    ) -> Tensor<B, 2> {
        let features = self.features(input, mask);
        let pooled = pieces
            .into_iter()
            .map(|piece| masked_max_pool(features.clone(), piece))
            .collect();
        Tensor::cat(pooled, 1)
    }
}

/// `tanh` of the max over positions where `mask == 1`; fully masked rows give -1
pub fn masked_max_pool<B: Backend>(features: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let penalty = mask
        .unsqueeze_dim::<3>(1)
        .sub_scalar(1.0)
        .mul_scalar(MASK_PENALTY);
    (features + penalty).max_dim(2).squeeze::<2>(2).tanh()
}

/// Softmax over dim 1 restricted to positions where `mask == 1`
pub fn masked_softmax<B: Backend>(scores: Tensor<B, 2>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
    let penalty = mask.sub_scalar(1.0).mul_scalar(MASK_PENALTY);
    softmax(scores + penalty, 1)
}

/// Additive attention conditioned on a query embedding.
///
/// `score_t = r · tanh(W_x x_t + W_q q)`, i.e. a bias-free projection of the
/// concatenation `[x_t; q]`.
#[derive(Module, Debug)]
pub struct QueryAttention<B: Backend> {
    token_proj: Linear<B>,
    query_proj: Linear<B>,
    score: Linear<B>,
}

impl<B: Backend> QueryAttention<B> {
    pub fn new(input_dim: usize, query_dim: usize, device: &B::Device) -> Self {
        let hidden = input_dim + query_dim;
        Self {
            token_proj: LinearConfig::new(input_dim, hidden).with_bias(false).init(device),
            query_proj: LinearConfig::new(query_dim, hidden).with_bias(false).init(device),
            score: LinearConfig::new(hidden, 1).with_bias(false).init(device),
        }
    }

    /// Attention-pooled sentence vector `[b, input_dim]`; `query` is `[b, 1, query_dim]`
    pub fn forward(&self, input: Tensor<B, 3>, query: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden = (self.token_proj.forward(input.clone()) + self.query_proj.forward(query)).tanh();
        let scores = self.score.forward(hidden).squeeze::<2>(2);
        let weights = masked_softmax(scores, mask);
        weights
            .unsqueeze_dim::<3>(1)
            .matmul(input)
            .squeeze::<2>(1)
    }
}

/// Self attention over token states without a query
#[derive(Module, Debug)]
pub struct WordAttention<B: Backend> {
    proj: Linear<B>,
    score: Linear<B>,
}

impl<B: Backend> WordAttention<B> {
    pub fn new(dim: usize, device: &B::Device) -> Self {
        Self {
            proj: LinearConfig::new(dim, dim).with_bias(false).init(device),
            score: LinearConfig::new(dim, 1).with_bias(false).init(device),
        }
    }

    /// Reweight every token state by its attention weight, `[b, l, dim]`
    pub fn forward(&self, states: Tensor<B, 3>, mask: Tensor<B, 2>) -> Tensor<B, 3> {
        let scores = self
            .score
            .forward(self.proj.forward(states.clone()).tanh())
            .squeeze::<2>(2);
        let weights = masked_softmax(scores, mask).unsqueeze_dim::<3>(2);
        states * weights
    }
}
