//! Experiment Configuration
//!
//! Every component takes its settings from an [`ExperimentConfig`] passed in
//! explicitly. The whole tree round-trips through TOML so a run can be
//! reproduced from the file saved next to its checkpoint.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::features::FeatureConfig;
use crate::model::config::ModelConfig;
use crate::utils::error::{RelExtError, Result};
use crate::utils::logging::LogConfig;

/// File the run configuration is saved to inside the output directory
pub const CONFIG_FILE: &str = "config.toml";

/// Corpus locations and loading limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the corpus, label and embedding files
    pub data_dir: PathBuf,
    /// Where checkpoints, vocabulary, logs and predictions go
    pub output_dir: PathBuf,
    pub train_file: String,
    pub dev_file: String,
    pub test_file: String,
    /// Newline-delimited relation names
    pub relations_file: String,
    /// Optional `word v1 .. vD` embedding file inside `data_dir`
    pub embedding_file: Option<String>,
    /// Training sentences with more whitespace tokens are dropped
    pub max_sentence_len: usize,
    /// Minimum corpus frequency for a word to enter the vocabulary
    pub word_density: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            train_file: "train.json".to_string(),
            dev_file: "dev.json".to_string(),
            test_file: "test.json".to_string(),
            relations_file: "relations.txt".to_string(),
            embedding_file: None,
            max_sentence_len: 100,
            word_density: 10,
        }
    }
}

impl DataConfig {
    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(&self.train_file)
    }

    pub fn dev_path(&self) -> PathBuf {
        self.data_dir.join(&self.dev_file)
    }

    pub fn test_path(&self) -> PathBuf {
        self.data_dir.join(&self.test_file)
    }

    pub fn relations_path(&self) -> PathBuf {
        self.data_dir.join(&self.relations_file)
    }

    pub fn embedding_path(&self) -> Option<PathBuf> {
        self.embedding_file
            .as_ref()
            .map(|name| self.data_dir.join(name))
    }

    pub fn vocab_path(&self) -> PathBuf {
        self.output_dir.join("vocab.json")
    }
}

/// Optimization loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Adagrad learning rate
    pub learning_rate: f64,
    /// Global gradient-norm bound
    pub max_grad_norm: f64,
    /// Stop once this many epochs pass without a dev F1 improvement
    pub early_stop_patience: usize,
    /// Base seed; epoch `e` (0-based) runs with `seed + e + 1`
    pub seed: u64,
    /// Show a per-batch progress bar
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 50,
            learning_rate: 0.01,
            max_grad_norm: 10.0,
            early_stop_patience: 5,
            seed: 1023,
            show_progress: true,
        }
    }
}

impl TrainingConfig {
    /// Tiny run for smoke tests and debugging
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 4,
            show_progress: false,
            ..Default::default()
        }
    }
}

/// Which training protocol runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingMode {
    /// Student + EMA teacher with consistency loss and self-filtering
    MeanTeacher,
    /// Single model, NLL loss only
    Supervised,
}

impl std::fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingMode::MeanTeacher => write!(f, "mean-teacher"),
            TrainingMode::Supervised => write!(f, "supervised"),
        }
    }
}

/// Mean-teacher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanTeacherConfig {
    /// `false` selects plain supervised training
    pub enabled: bool,
    /// Target EMA decay
    pub alpha: f64,
    /// Epochs over which the EMA decay ramps up to `alpha`
    pub rampup_epochs: usize,
    /// Re-filter the training set with the teacher after every epoch
    pub filtering: bool,
    /// Labels considered when filtering
    pub top_k: usize,
}

impl Default for MeanTeacherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.9,
            rampup_epochs: 5,
            filtering: true,
            top_k: 3,
        }
    }
}

impl MeanTeacherConfig {
    pub fn mode(&self) -> TrainingMode {
        if self.enabled {
            TrainingMode::MeanTeacher
        } else {
            TrainingMode::Supervised
        }
    }
}

/// Scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Relation names that never count as positives
    pub ignore_labels: Vec<String>,
    /// Lower precision bound for the PR-curve area
    pub min_precision: f64,
    /// Lower recall bound for the PR-curve area
    pub min_recall: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ignore_labels: vec!["None".to_string(), "NA".to_string(), "Other".to_string()],
            min_precision: 0.0,
            min_recall: 0.0,
        }
    }
}

/// Complete configuration of one experiment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub data: DataConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub mean_teacher: MeanTeacherConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LogConfig,
}

impl ExperimentConfig {
    /// Read a TOML file; missing keys fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RelExtError::PathNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration saved next to a checkpoint, or the defaults when the
    /// directory has none
    pub fn load_saved(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings no run could use
    pub fn validate(&self) -> Result<()> {
        self.model.validate().map_err(RelExtError::Config)?;

        if self.training.batch_size == 0 {
            return Err(RelExtError::Config("batch_size must be greater than 0".into()));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(RelExtError::Config("learning_rate must be positive".into()));
        }
        if self.training.max_grad_norm <= 0.0 {
            return Err(RelExtError::Config("max_grad_norm must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.mean_teacher.alpha) {
            return Err(RelExtError::Config("alpha must be in range [0.0, 1.0]".into()));
        }
        if self.mean_teacher.top_k == 0 {
            return Err(RelExtError::Config("top_k must be greater than 0".into()));
        }
        if self.features.max_distance == 0 {
            return Err(RelExtError::Config("max_distance must be greater than 0".into()));
        }
        if self.data.max_sentence_len == 0 {
            return Err(RelExtError::Config("max_sentence_len must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::Architecture;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.training.seed, 1023);
        assert_eq!(config.training.batch_size, 50);
        assert_eq!(config.features.max_distance, 30);
        assert_eq!(config.mean_teacher.top_k, 3);
        assert_eq!(config.mean_teacher.mode(), TrainingMode::MeanTeacher);
        assert!(config.evaluation.ignore_labels.contains(&"None".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let text = r#"
            [model]
            architecture = "pcnn"

            [training]
            batch_size = 8

            [mean_teacher]
            enabled = false
        "#;
        let config: ExperimentConfig = toml::from_str(text).unwrap();
        assert_eq!(config.model.architecture, Architecture::Pcnn);
        assert_eq!(config.training.batch_size, 8);
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.mean_teacher.mode(), TrainingMode::Supervised);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ExperimentConfig::default();
        config.training.seed = 7;
        config.data.embedding_file = Some("glove.txt".to_string());
        config.save(&path).unwrap();

        let loaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!(loaded.training.seed, 7);
        assert_eq!(loaded.data.embedding_path(), Some(PathBuf::from("data/glove.txt")));
    }

    #[test]
    fn test_load_saved_reads_checkpoint_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExperimentConfig::default();
        config.data.data_dir = PathBuf::from("corpus/nyt");
        config.data.embedding_file = Some("glove.txt".to_string());
        config.features.max_distance = 12;
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = ExperimentConfig::load_saved(dir.path()).unwrap();
        assert_eq!(loaded.data.data_dir, PathBuf::from("corpus/nyt"));
        assert_eq!(loaded.data.embedding_file.as_deref(), Some("glove.txt"));
        assert_eq!(loaded.features.max_distance, 12);
    }

    #[test]
    fn test_load_saved_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ExperimentConfig::load_saved(dir.path()).unwrap();
        assert_eq!(loaded.training.seed, 1023);
        assert_eq!(loaded.data.data_dir, DataConfig::default().data_dir);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ExperimentConfig::default();
        config.training.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.mean_teacher.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.mean_teacher.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.model.dropout_rate = 1.0;
        assert!(config.validate().is_err());

        assert!(ExperimentConfig::load(Path::new("/nonexistent/config.toml")).is_err());
    }
}
