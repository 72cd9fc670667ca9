//! Test-time evaluation of one checkpoint or an ensemble of checkpoints
//!
//! Scores dev and test, picks the decision threshold on dev, and leaves the
//! prediction file, the PR sweep and its standardized form in the output
//! directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExperimentConfig;
use crate::dataset::batcher::RelationBatcher;
use crate::dataset::corpus::{CorpusLoader, LabelMap, LoadMode};
use crate::dataset::features::{FeatureConfig, FeatureExtractor, RelationExample};
use crate::dataset::vocab::Vocabulary;
use crate::inference::predictor::{average_scores, predict, write_predictions};
use crate::model::RelationClassifier;
use crate::training::checkpoint::{CheckpointMetadata, CheckpointStore};
use crate::training::runner::load_labels;
use crate::utils::error::{RelExtError, Result};
use crate::utils::metrics::{
    area_under_curve, best_threshold, count_unrecognized, pr_curve, score_threshold,
    standardize_pr_curve, write_pr_curve, write_standardized_pr_curve, PrfScore, PR_CURVE_STEP,
};

pub const PREDICTIONS_FILE: &str = "test-output.json";
pub const PR_CURVE_FILE: &str = "test-pr.csv";
pub const STANDARDIZED_PR_FILE: &str = "test-pr-std.csv";
pub const REPORT_FILE: &str = "test-report.json";

/// A checkpoint rebuilt for inference, with the vocabulary it was trained on
pub struct LoadedModel<B: Backend> {
    pub model: RelationClassifier<B>,
    pub batcher: RelationBatcher<B>,
    pub metadata: CheckpointMetadata,
}

/// Rebuild the scorer stored in `dir` and load its weights
pub fn load_model<B: Backend>(
    dir: &Path,
    labels: Arc<LabelMap>,
    device: &B::Device,
) -> Result<LoadedModel<B>> {
    let store = CheckpointStore::new(dir);
    let metadata = store.load_metadata()?;
    let vocab = Vocabulary::load(&dir.join("vocab.json"))?;

    if vocab.len() != metadata.vocab_size {
        return Err(RelExtError::Checkpoint(format!(
            "{}: vocabulary has {} entries, checkpoint expects {}",
            dir.display(),
            vocab.len(),
            metadata.vocab_size
        )));
    }
    if labels.len() != metadata.num_labels {
        return Err(RelExtError::Checkpoint(format!(
            "{}: label file has {} relations, checkpoint expects {}",
            dir.display(),
            labels.len(),
            metadata.num_labels
        )));
    }

    let model = RelationClassifier::<B>::new(&metadata.model, metadata.dims(), None, device)?;
    let model = store.load_model(model, device)?;
    info!(
        "Loaded {} from {} (epoch {}, dev F1 {:.3})",
        metadata.model.architecture,
        dir.display(),
        metadata.epoch,
        metadata.dev_f1
    );

    Ok(LoadedModel {
        model,
        batcher: RelationBatcher::new(Arc::new(vocab), labels, device.clone()),
        metadata,
    })
}

/// Outcome of a test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub models: Vec<PathBuf>,
    pub dev_at_zero: PrfScore,
    pub threshold: f64,
    pub dev_at_threshold: PrfScore,
    pub test_at_zero: PrfScore,
    pub test_at_threshold: PrfScore,
    /// Test gold labels outside the label file
    pub unrecognized: usize,
    pub auc: f64,
}

/// Evaluate the averaged scores of every checkpoint in `model_dirs`.
///
/// A single directory is the plain `test` workflow.
pub fn run_evaluation<B: Backend>(
    config: &ExperimentConfig,
    model_dirs: &[PathBuf],
    device: &B::Device,
) -> Result<EvaluationReport> {
    if model_dirs.is_empty() {
        return Err(RelExtError::Config("no model directories given".to_string()));
    }

    let labels = Arc::new(load_labels(config)?);
    let mut models = Vec::with_capacity(model_dirs.len());
    for dir in model_dirs {
        models.push(load_model::<B>(dir, labels.clone(), device)?);
    }
    let features = shared_features(&models, model_dirs)?;
    if features != config.features {
        info!("Using the feature settings stored with the checkpoint: {:?}", features);
    }

    let extractor = FeatureExtractor::new(features);
    let loader = CorpusLoader::new(&labels, &extractor, config.data.max_sentence_len);
    let (dev, dev_stats) = loader.load_file(&config.data.dev_path(), LoadMode::Evaluation)?;
    let (test, test_stats) = loader.load_file(&config.data.test_path(), LoadMode::Evaluation)?;
    info!("Data sizes: dev {:?}, test {:?}", dev_stats, test_stats);

    let batch_size = config.training.batch_size;
    let mut dev_runs = Vec::with_capacity(models.len());
    let mut test_runs = Vec::with_capacity(models.len());
    for loaded in &models {
        B::seed(config.training.seed);
        dev_runs.push(predict(&loaded.model, &dev, &loaded.batcher, batch_size)?);
        test_runs.push(predict(&loaded.model, &test, &loaded.batcher, batch_size)?);
    }
    if model_dirs.len() > 1 {
        info!("Averaging scores of {} models", model_dirs.len());
    }
    let dev_scores = average_scores(&dev_runs)?;
    let test_scores = average_scores(&test_runs)?;

    let dev_gold = gold_labels(&dev);
    let test_gold = gold_labels(&test);

    let dev_at_zero = score_threshold(&dev_gold, &dev_scores, &labels, 0.0).score();
    info!("Dev @ 0.00: {}", dev_at_zero);
    let (threshold, dev_at_threshold) = best_threshold(&dev_gold, &dev_scores, &labels);
    info!("Dev best threshold {:.2}: {}", threshold, dev_at_threshold);

    let test_at_zero = score_threshold(&test_gold, &test_scores, &labels, 0.0).score();
    info!("Test @ 0.00: {}", test_at_zero);
    let test_at_threshold = score_threshold(&test_gold, &test_scores, &labels, threshold).score();
    info!("Test @ {:.2}: {}", threshold, test_at_threshold);
    let unrecognized = count_unrecognized(&test_gold, &labels);
    if unrecognized > 0 {
        warn!("{} test mentions carry labels outside the label file", unrecognized);
    }

    let output_dir = &config.data.output_dir;
    fs::create_dir_all(output_dir)?;
    write_predictions(
        &output_dir.join(PREDICTIONS_FILE),
        &test,
        &test_scores,
        &labels,
        threshold,
    )?;

    let curve = pr_curve(&test_gold, &test_scores, &labels, PR_CURVE_STEP);
    write_pr_curve(&curve, &output_dir.join(PR_CURVE_FILE))?;
    let standardized = standardize_pr_curve(&curve);
    write_standardized_pr_curve(&standardized, &output_dir.join(STANDARDIZED_PR_FILE))?;
    let auc = area_under_curve(
        &standardized,
        config.evaluation.min_precision,
        config.evaluation.min_recall,
    );
    info!("Test AUC: {:.4}", auc);

    let report = EvaluationReport {
        models: model_dirs.to_vec(),
        dev_at_zero,
        threshold,
        dev_at_threshold,
        test_at_zero,
        test_at_threshold,
        unrecognized,
        auc,
    };
    fs::write(
        output_dir.join(REPORT_FILE),
        serde_json::to_string_pretty(&report)?,
    )?;
    Ok(report)
}

/// Feature settings every checkpoint was trained with.
///
/// Distance ids index each scorer's embedding tables, so examples must be
/// built exactly as during training.
fn shared_features<B: Backend>(
    models: &[LoadedModel<B>],
    dirs: &[PathBuf],
) -> Result<FeatureConfig> {
    let Some(first) = models.first() else {
        return Err(RelExtError::Config("no model directories given".to_string()));
    };
    for (loaded, dir) in models.iter().zip(dirs).skip(1) {
        if loaded.metadata.features != first.metadata.features {
            return Err(RelExtError::Checkpoint(format!(
                "{} was trained with features {:?}, but {} used {:?}",
                dir.display(),
                loaded.metadata.features,
                dirs[0].display(),
                first.metadata.features
            )));
        }
    }
    Ok(first.metadata.features.clone())
}

fn gold_labels(examples: &[RelationExample]) -> Vec<&str> {
    examples.iter().map(|e| e.relation.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    use super::*;
    use crate::training::runner::run_training;
    use crate::training::runner::tests::{tiny_config, write_dataset};

    type TrainBackend = Autodiff<NdArray<f32>>;
    type TestBackend = NdArray<f32>;

    fn trained(dir: &Path) -> ExperimentConfig {
        trained_with(dir, "model", FeatureConfig::default())
    }

    fn trained_with(dir: &Path, name: &str, features: FeatureConfig) -> ExperimentConfig {
        write_dataset(dir);
        let mut config = tiny_config(dir, &dir.join(name));
        config.features = features;
        run_training::<TrainBackend>(&config, &Default::default()).unwrap();
        config
    }

    #[test]
    fn test_single_model_evaluation_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = trained(dir.path());
        let model_dir = config.data.output_dir.clone();
        config.data.output_dir = dir.path().join("eval");

        let report =
            run_evaluation::<TestBackend>(&config, &[model_dir], &Default::default()).unwrap();
        assert!((0.0..1.0).contains(&report.threshold));
        assert!(report.dev_at_threshold.f1 >= report.dev_at_zero.f1);
        assert!(report.auc >= 0.0);
        assert_eq!(report.unrecognized, 0);

        let out = &config.data.output_dir;
        let predictions = fs::read_to_string(out.join(PREDICTIONS_FILE)).unwrap();
        // three source sentences
        assert_eq!(predictions.lines().count(), 3);
        let curve = fs::read_to_string(out.join(PR_CURVE_FILE)).unwrap();
        assert_eq!(curve.lines().count(), 1002);
        assert!(out.join(STANDARDIZED_PR_FILE).exists());
        assert!(out.join(REPORT_FILE).exists());
    }

    #[test]
    fn test_ensemble_of_identical_models_matches_single() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = trained(dir.path());
        let model_dir = config.data.output_dir.clone();
        let device = Default::default();

        config.data.output_dir = dir.path().join("single");
        let single =
            run_evaluation::<TestBackend>(&config, &[model_dir.clone()], &device).unwrap();
        config.data.output_dir = dir.path().join("ensemble");
        let ensemble =
            run_evaluation::<TestBackend>(&config, &[model_dir.clone(), model_dir], &device)
                .unwrap();

        assert_eq!(single.threshold, ensemble.threshold);
        assert!((single.test_at_threshold.f1 - ensemble.test_at_threshold.f1).abs() < 1e-9);
    }

    #[test]
    fn test_label_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = trained(dir.path());
        let labels = Arc::new(LabelMap::from_names(["employer", "None"]));
        let result = load_model::<TestBackend>(&config.data.output_dir, labels, &Default::default());
        assert!(matches!(result, Err(RelExtError::Checkpoint(_))));
    }

    #[test]
    fn test_evaluation_uses_checkpoint_feature_settings() {
        let dir = tempfile::tempdir().unwrap();
        let narrow = FeatureConfig {
            max_distance: 2,
            ..FeatureConfig::default()
        };
        let trained = trained_with(dir.path(), "model", narrow);
        let model_dir = trained.data.output_dir.clone();

        // evaluate with default features, as a bare `test` invocation would
        let mut config = tiny_config(dir.path(), &dir.path().join("eval"));
        config.features = FeatureConfig::default();
        let report =
            run_evaluation::<TestBackend>(&config, &[model_dir], &Default::default()).unwrap();
        assert!((0.0..1.0).contains(&report.threshold));
        assert!(config.data.output_dir.join(REPORT_FILE).exists());
    }

    #[test]
    fn test_ensemble_with_different_features_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wide = trained_with(dir.path(), "wide", FeatureConfig::default());
        let narrow = trained_with(
            dir.path(),
            "narrow",
            FeatureConfig {
                max_distance: 2,
                ..FeatureConfig::default()
            },
        );

        let mut config = wide.clone();
        config.data.output_dir = dir.path().join("eval");
        let result = run_evaluation::<TestBackend>(
            &config,
            &[wide.data.output_dir.clone(), narrow.data.output_dir.clone()],
            &Default::default(),
        );
        assert!(matches!(result, Err(RelExtError::Checkpoint(_))));
    }

    #[test]
    fn test_no_model_dirs_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path(), &dir.path().join("out"));
        assert!(run_evaluation::<TestBackend>(&config, &[], &Default::default()).is_err());
    }
}
