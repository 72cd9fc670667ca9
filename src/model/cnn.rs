//! Convolutional scorers: plain max-pooled CNN and piecewise CNN

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::dataset::batcher::RelationBatch;
use crate::dataset::vocab::EmbeddingMatrix;
use crate::model::config::ModelConfig;
use crate::model::layers::{MaskedConv, ScorerDims, TokenEmbedder};
use crate::model::Scorer;
use crate::utils::error::Result;

/// Convolution + max-pooling over the whole sentence
#[derive(Module, Debug)]
pub struct CnnScorer<B: Backend> {
    embedder: TokenEmbedder<B>,
    conv: MaskedConv<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> CnnScorer<B> {
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(Self {
            embedder: TokenEmbedder::new(config, dims, pretrained, device)?,
            conv: MaskedConv::new(config.input_dim(), config.num_filters, config.kernel_size, device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            output: LinearConfig::new(config.num_filters, dims.num_labels).init(device),
        })
    }
}

impl<B: Backend> Scorer<B> for CnnScorer<B> {
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        let tokens = self.embedder.forward(batch);
        let pooled = self.conv.forward_max(tokens, batch.words_mask.clone());
        self.output.forward(self.dropout.forward(pooled))
    }
}

/// Convolution pooled separately over the three argument-delimited pieces
#[derive(Module, Debug)]
pub struct PcnnScorer<B: Backend> {
    embedder: TokenEmbedder<B>,
    conv: MaskedConv<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> PcnnScorer<B> {
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(Self {
            embedder: TokenEmbedder::new(config, dims, pretrained, device)?,
            conv: MaskedConv::new(config.input_dim(), config.num_filters, config.kernel_size, device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            output: LinearConfig::new(3 * config.num_filters, dims.num_labels).init(device),
        })
    }
}

impl<B: Backend> Scorer<B> for PcnnScorer<B> {
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        let tokens = self.embedder.forward(batch);
        let pooled = self.conv.forward_piecewise(
            tokens,
            batch.words_mask.clone(),
            [
                batch.piece1_mask.clone(),
                batch.piece2_mask.clone(),
                batch.piece3_mask.clone(),
            ],
        );
        self.output.forward(self.dropout.forward(pooled))
    }
}
