//! Entity-attention scorer
//!
//! CNN sentence features concatenated with two attention readouts, each one
//! queried by the embedding of an argument's head word.

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::dataset::batcher::RelationBatch;
use crate::dataset::vocab::EmbeddingMatrix;
use crate::model::config::ModelConfig;
use crate::model::layers::{MaskedConv, QueryAttention, ScorerDims, TokenEmbedder};
use crate::model::Scorer;
use crate::utils::error::Result;

#[derive(Module, Debug)]
pub struct EntityAttentionScorer<B: Backend> {
    embedder: TokenEmbedder<B>,
    conv: MaskedConv<B>,
    arg1_attention: QueryAttention<B>,
    arg2_attention: QueryAttention<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> EntityAttentionScorer<B> {
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        let input_dim = config.input_dim();
        Ok(Self {
            embedder: TokenEmbedder::new(config, dims, pretrained, device)?,
            conv: MaskedConv::new(input_dim, config.num_filters, config.kernel_size, device),
            arg1_attention: QueryAttention::new(input_dim, config.word_embed_dim, device),
            arg2_attention: QueryAttention::new(input_dim, config.word_embed_dim, device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            output: LinearConfig::new(config.num_filters + 2 * input_dim, dims.num_labels)
                .init(device),
        })
    }
}

impl<B: Backend> Scorer<B> for EntityAttentionScorer<B> {
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        let tokens = self.embedder.forward(batch);
        let mask = batch.words_mask.clone();

        let sentence = self.conv.forward_max(tokens.clone(), mask.clone());
        let arg1 = self.arg1_attention.forward(
            tokens.clone(),
            self.embedder.embed_words(batch.arg1_head.clone()),
            mask.clone(),
        );
        let arg2 = self.arg2_attention.forward(
            tokens,
            self.embedder.embed_words(batch.arg2_head.clone()),
            mask,
        );

        let features = Tensor::cat(vec![sentence, arg1, arg2], 1);
        self.output.forward(self.dropout.forward(features))
    }
}
