//! Bi-GRU word-attention scorer
//!
//! A bidirectional GRU (hidden width `2 * input_dim`) encodes the sentence,
//! word attention reweights the states, and a piecewise convolution pools
//! them.

use burn::{
    module::Module,
    nn::{
        gru::{Gru, GruConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::dataset::batcher::RelationBatch;
use crate::dataset::vocab::EmbeddingMatrix;
use crate::model::config::ModelConfig;
use crate::model::layers::{MaskedConv, ScorerDims, TokenEmbedder, WordAttention};
use crate::model::Scorer;
use crate::utils::error::Result;

#[derive(Module, Debug)]
pub struct BgwaScorer<B: Backend> {
    embedder: TokenEmbedder<B>,
    gru_forward: Gru<B>,
    gru_backward: Gru<B>,
    attention: WordAttention<B>,
    conv: MaskedConv<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> BgwaScorer<B> {
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        let input_dim = config.input_dim();
        let hidden_dim = 2 * input_dim;
        // per direction: half of the concatenated hidden width
        let gru = GruConfig::new(input_dim, hidden_dim / 2, true);
        Ok(Self {
            embedder: TokenEmbedder::new(config, dims, pretrained, device)?,
            gru_forward: gru.init(device),
            gru_backward: gru.init(device),
            attention: WordAttention::new(hidden_dim, device),
            conv: MaskedConv::new(hidden_dim, config.num_filters, config.kernel_size, device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            output: LinearConfig::new(3 * config.num_filters, dims.num_labels).init(device),
        })
    }

    /// `[b, l, input]` -> `[b, l, 2 * (hidden / 2)]`
    fn encode(&self, tokens: Tensor<B, 3>) -> Tensor<B, 3> {
        let forward = self.gru_forward.forward(tokens.clone(), None);
        let backward = self
            .gru_backward
            .forward(tokens.flip([1]), None)
            .flip([1]);
        Tensor::cat(vec![forward, backward], 2)
    }
}

impl<B: Backend> Scorer<B> for BgwaScorer<B> {
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        let states = self.encode(self.embedder.forward(batch));
        let attended = self.attention.forward(states, batch.words_mask.clone());
        let pooled = self.conv.forward_piecewise(
            attended,
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
