//! Relation scorers built with Burn
//!
//! Every architecture implements [`Scorer`]: it maps a [`RelationBatch`] to
//! unnormalized per-class logits `[batch, num_labels]`. The trainer, the
//! evaluator and the predictor only ever see that trait.
//!
//! - `cnn`: masked CNN and piecewise CNN
//! - `attention`: CNN + argument-conditioned attention
//! - `bgwa`: bidirectional GRU with word attention and piecewise pooling
//! - `layers`: shared embedding, convolution and attention blocks

pub mod attention;
pub mod bgwa;
pub mod cnn;
pub mod config;
pub mod layers;

use burn::{
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::dataset::batcher::RelationBatch;
use crate::dataset::vocab::EmbeddingMatrix;
use crate::utils::error::Result;

pub use attention::EntityAttentionScorer;
pub use bgwa::BgwaScorer;
pub use cnn::{CnnScorer, PcnnScorer};
pub use config::{Architecture, ModelConfig};
pub use layers::ScorerDims;

/// Anything that turns a batch into per-class logits
pub trait Scorer<B: Backend> {
    /// Unnormalized scores, `[batch, num_labels]`
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2>;

    /// Softmax-normalized scores
    fn score_probs(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        softmax(self.score(batch), 1)
    }
}

/// Scorer variants
#[derive(Module, Debug)]
pub enum ScorerArchitecture<B: Backend> {
    Cnn(CnnScorer<B>),
    Pcnn(PcnnScorer<B>),
    EntityAttention(EntityAttentionScorer<B>),
    Bgwa(BgwaScorer<B>),
}

/// Unified relation classifier over the configured architecture
#[derive(Module, Debug)]
pub struct RelationClassifier<B: Backend> {
    arch: ScorerArchitecture<B>,
    num_labels: usize,
}

impl<B: Backend> RelationClassifier<B> {
    /// Build the configured architecture.
    ///
    /// `pretrained` seeds the word embedding table; pass `None` when the
    /// weights will come from a checkpoint.
    pub fn new(
        config: &ModelConfig,
        dims: ScorerDims,
        pretrained: Option<&EmbeddingMatrix>,
        device: &B::Device,
    ) -> Result<Self> {
        let arch = match config.architecture {
            Architecture::Cnn => {
                ScorerArchitecture::Cnn(CnnScorer::new(config, dims, pretrained, device)?)
            }
            Architecture::Pcnn => {
                ScorerArchitecture::Pcnn(PcnnScorer::new(config, dims, pretrained, device)?)
            }
            Architecture::EntityAttention => ScorerArchitecture::EntityAttention(
                EntityAttentionScorer::new(config, dims, pretrained, device)?,
            ),
            Architecture::Bgwa => {
                ScorerArchitecture::Bgwa(BgwaScorer::new(config, dims, pretrained, device)?)
            }
        };

        Ok(Self {
            arch,
            num_labels: dims.num_labels,
        })
    }

    /// Get the number of output classes
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }
}

impl<B: Backend> Scorer<B> for RelationClassifier<B> {
    fn score(&self, batch: &RelationBatch<B>) -> Tensor<B, 2> {
        match &self.arch {
            ScorerArchitecture::Cnn(model) => model.score(batch),
            ScorerArchitecture::Pcnn(model) => model.score(batch),
            ScorerArchitecture::EntityAttention(model) => model.score(batch),
            ScorerArchitecture::Bgwa(model) => model.score(batch),
        }
    }
}
