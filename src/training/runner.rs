//! End-to-end training run
//!
//! Loads the corpus splits, builds and saves the vocabulary, creates the
//! configured scorer and hands everything to [`MeanTeacherTrainer`].

use std::fs;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

pub use crate::config::CONFIG_FILE;
use crate::config::ExperimentConfig;
use crate::dataset::corpus::{CorpusLoader, LabelMap, LoadMode};
use crate::dataset::features::FeatureExtractor;
use crate::dataset::vocab::{build_vocabulary, EmbeddingMatrix, TokenFrequencies, Vocabulary};
use crate::model::layers::ScorerDims;
use crate::model::RelationClassifier;
use crate::training::trainer::{MeanTeacherTrainer, TrainingData, TrainingSummary};
use crate::utils::error::{RelExtError, Result};

/// File the training summary is saved to inside the output directory
pub const SUMMARY_FILE: &str = "training_summary.json";

/// Label map with the configured ignore set applied
pub fn load_labels(config: &ExperimentConfig) -> Result<LabelMap> {
    Ok(LabelMap::load(&config.data.relations_path())?
        .with_ignored(config.evaluation.ignore_labels.iter().cloned()))
}

/// Corpus splits plus the vocabulary built over them
pub struct PreparedData {
    pub labels: Arc<LabelMap>,
    pub vocab: Arc<Vocabulary>,
    pub embeddings: EmbeddingMatrix,
    pub data: TrainingData,
}

/// Load train/dev/test and build the vocabulary.
///
/// The training split drops over-long sentences and unknown labels; dev and
/// test keep every mention.
pub fn prepare_data(config: &ExperimentConfig) -> Result<PreparedData> {
    let labels = load_labels(config)?;
    info!("Relation labels: {}", labels.len());

    let extractor = FeatureExtractor::new(config.features.clone());
    let loader = CorpusLoader::new(&labels, &extractor, config.data.max_sentence_len);
    let (train, _) = loader.load_file(&config.data.train_path(), LoadMode::Training)?;
    let (dev, _) = loader.load_file(&config.data.dev_path(), LoadMode::Evaluation)?;
    let (test, _) = loader.load_file(&config.data.test_path(), LoadMode::Evaluation)?;

    let frequencies = TokenFrequencies::from_examples(train.iter().chain(&dev).chain(&test));
    let mut rng = ChaCha8Rng::seed_from_u64(config.training.seed);
    let embedding_path = config.data.embedding_path();
    let (vocab, embeddings) = build_vocabulary(
        &frequencies,
        embedding_path.as_deref(),
        config.model.word_embed_dim,
        config.data.word_density,
        &mut rng,
    )?;

    Ok(PreparedData {
        labels: Arc::new(labels),
        vocab: Arc::new(vocab),
        embeddings,
        data: TrainingData { train, dev, test },
    })
}

/// Train a model as configured and leave the checkpoint, vocabulary,
/// configuration and summary in the output directory
pub fn run_training<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;
    let output_dir = &config.data.output_dir;
    fs::create_dir_all(output_dir)?;
    config.save(&output_dir.join(CONFIG_FILE))?;

    B::seed(config.training.seed);
    let prepared = prepare_data(config)?;
    if prepared.data.train.is_empty() {
        return Err(RelExtError::Training(format!(
            "no usable training examples in {}",
            config.data.train_path().display()
        )));
    }
    prepared.vocab.save(&config.data.vocab_path())?;
    info!(
        "Data sizes: train {}, dev {}, test {}",
        prepared.data.train.len(),
        prepared.data.dev.len(),
        prepared.data.test.len()
    );

    let dims = ScorerDims {
        vocab_size: prepared.vocab.len(),
        distance_vocab_size: config.features.distance_vocab_size(),
        num_labels: prepared.labels.len(),
    };
    let student =
        RelationClassifier::<B>::new(&config.model, dims, Some(&prepared.embeddings), device)?;
    info!("Scorer: {} ({:?})", config.model.architecture, dims);

    let mut trainer = MeanTeacherTrainer::<B>::new(
        config.clone(),
        prepared.vocab.clone(),
        prepared.labels.clone(),
        device.clone(),
    );
    let summary = trainer.fit(student, &prepared.data)?;

    fs::write(
        output_dir.join(SUMMARY_FILE),
        serde_json::to_string_pretty(&summary)?,
    )?;
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    use super::*;
    use crate::config::TrainingConfig;
    use crate::model::config::{Architecture, ModelConfig};
    use crate::training::checkpoint::CheckpointStore;

    type TestBackend = Autodiff<NdArray<f32>>;

    const CORPUS: &str = r#"{"sentId": 1, "sentText": "John works at Acme", "relationMentions": [{"arg1Text": "John", "arg2Text": "Acme", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 3, "arg2EndIndex": 3, "relationName": "employer"}]}
{"sentId": 2, "sentText": "Paris is in France", "relationMentions": [{"arg1Text": "Paris", "arg2Text": "France", "arg1StartIndex": "0", "arg1EndIndex": "0", "arg2StartIndex": "3", "arg2EndIndex": "3", "relationName": "located_in"}]}
{"sentId": 3, "sentText": "John met Paris at Acme", "relationMentions": [{"arg1Text": "John", "arg2Text": "Paris", "arg1StartIndex": 0, "arg1EndIndex": 0, "arg2StartIndex": 2, "arg2EndIndex": 2, "relationName": "None"}, {"arg1Text": "Paris", "arg2Text": "Acme", "arg1StartIndex": 2, "arg1EndIndex": 2, "arg2StartIndex": 4, "arg2EndIndex": 4, "relationName": "employer"}]}
"#;

    pub(crate) fn write_dataset(dir: &Path) {
        fs::write(dir.join("relations.txt"), "employer\nlocated_in\nNone\n").unwrap();
        for name in ["train.json", "dev.json", "test.json"] {
            fs::write(dir.join(name), CORPUS).unwrap();
        }
        fs::write(
            dir.join("vectors.txt"),
            "John 0.1 0.2 0.3 0.4\nAcme 0.5 0.6 0.7 0.8\nbroken 0.1 x 0.3 0.4\n",
        )
        .unwrap();
    }

    pub(crate) fn tiny_config(data: &Path, output: &Path) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.data.data_dir = data.to_path_buf();
        config.data.output_dir = output.to_path_buf();
        config.data.word_density = 1;
        config.data.embedding_file = Some("vectors.txt".to_string());
        config.training = TrainingConfig::debug();
        config.model = ModelConfig {
            architecture: Architecture::Cnn,
            word_embed_dim: 4,
            distance_embed_dim: 2,
            num_filters: 5,
            ..Default::default()
        };
        config
    }

    #[test]
    fn test_prepare_data_builds_vocabulary_over_all_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let config = tiny_config(dir.path(), &dir.path().join("out"));

        let prepared = prepare_data(&config).unwrap();
        assert_eq!(prepared.data.train.len(), 4);
        assert_eq!(prepared.data.dev.len(), 4);
        // pretrained words come first, right after <PAD> and <UNK>
        assert_eq!(prepared.vocab.get("John"), Some(2));
        assert_eq!(prepared.vocab.get("Acme"), Some(3));
        assert!(prepared.vocab.get("broken").is_none());
        assert_eq!(prepared.embeddings.row(2), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(prepared.embeddings.rows(), prepared.vocab.len());
        assert!(prepared.labels.is_ignored("None"));
    }

    #[test]
    fn test_run_training_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let output = dir.path().join("out");
        let config = tiny_config(dir.path(), &output);

        let summary = run_training::<TestBackend>(&config, &Default::default()).unwrap();
        assert_eq!(summary.epochs_run, 2);

        assert!(output.join(CONFIG_FILE).exists());
        assert!(output.join(SUMMARY_FILE).exists());
        assert!(Vocabulary::load(&config.data.vocab_path()).is_ok());
        assert!(CheckpointStore::new(&output).exists());
        let reloaded = ExperimentConfig::load(&output.join(CONFIG_FILE)).unwrap();
        assert_eq!(reloaded.model.architecture, Architecture::Cnn);
    }

    #[test]
    fn test_missing_label_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path(), &dir.path().join("out"));
        assert!(matches!(load_labels(&config), Err(RelExtError::PathNotFound(_))));
    }
}
