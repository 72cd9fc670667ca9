//! Mean-Teacher Training Loop
//!
//! Each epoch:
//! 1. re-seeds every random source with `seed + epoch + 1`;
//! 2. block-shuffles the active training set by sentence length;
//! 3. for every batch, minimizes `NLL(student) + ||softmax(student) - softmax(teacher)||^2 / batch`,
//!    clips the student's global gradient norm, takes an Adagrad step and
//!    moves the teacher toward the student with a ramped EMA;
//! 4. scores the teacher on dev (checkpointing on strict improvement) and on
//!    test for monitoring;
//! 5. stops after `early_stop_patience` epochs without improvement, or
//!    otherwise re-filters the training set with the teacher.
//!
//! With the mean teacher disabled the same loop trains a single model on
//! the NLL loss alone, without EMA or filtering.

use std::sync::Arc;

use burn::{
    module::AutodiffModule,
    optim::{AdaGradConfig, GradientsParams, Optimizer},
    tensor::{
        activation::{log_softmax, softmax},
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ExperimentConfig, TrainingMode};
use crate::dataset::batcher::{batch_ranges, RelationBatcher};
use crate::dataset::corpus::LabelMap;
use crate::dataset::features::RelationExample;
use crate::dataset::shuffle::block_shuffle;
use crate::dataset::vocab::Vocabulary;
use crate::inference::predict;
use crate::model::Scorer;
use crate::training::checkpoint::{CheckpointMetadata, CheckpointStore};
use crate::training::ema::{apply_ema, rampup_decay, NamedParameters};
use crate::training::filter::{filter_examples, FilterReport};
use crate::training::grad_clip::clip_grad_norm;
use crate::utils::error::{RelExtError, Result, ResultExt};
use crate::utils::metrics::{score_threshold, PrfScore};

/// Train/dev/test examples for one run
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub train: Vec<RelationExample>,
    pub dev: Vec<RelationExample>,
    pub test: Vec<RelationExample>,
}

/// What happened in one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based
    pub epoch: usize,
    pub seed: u64,
    pub train_loss: f64,
    /// Size of the active training set during this epoch
    pub active_examples: usize,
    pub dev: PrfScore,
    pub test: PrfScore,
    /// EMA decay used for the epoch's last teacher update
    pub alpha: Option<f64>,
    /// Largest pre-clipping gradient norm seen in the epoch
    pub max_grad_norm: f64,
    pub improved: bool,
    /// Filtering pass that ran after this epoch
    pub filter: Option<FilterReport>,
}

/// Training state for checkpointing and monitoring
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    /// Optimizer steps taken plus one; drives the EMA ramp-up
    pub global_step: usize,
    /// Dev F1 (rounded to 3 decimals) of the saved checkpoint
    pub best_dev_f1: f64,
    /// 1-based epoch of the saved checkpoint, 0 before the first save
    pub best_epoch: usize,
    pub best_seed: u64,
    pub history: Vec<EpochRecord>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            epoch: 0,
            global_step: 1,
            best_dev_f1: -1.0,
            best_epoch: 0,
            best_seed: 0,
            history: Vec::new(),
        }
    }
}

impl TrainingState {
    /// Record `dev_f1` for the 1-based `epoch`; true on strict improvement
    pub fn record_dev_f1(&mut self, epoch: usize, seed: u64, dev_f1: f64) -> bool {
        if dev_f1 > self.best_dev_f1 {
            self.best_dev_f1 = dev_f1;
            self.best_epoch = epoch;
            self.best_seed = seed;
            true
        } else {
            false
        }
    }

    /// Early stopping check after the 1-based `epoch`
    pub fn should_stop(&self, epoch: usize, patience: usize) -> bool {
        epoch.saturating_sub(self.best_epoch) >= patience
    }
}

/// Final result of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub mode: TrainingMode,
    pub best_epoch: usize,
    pub best_seed: u64,
    pub best_dev_f1: f64,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub history: Vec<EpochRecord>,
}

/// Round to three decimals, the precision model selection works at
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Trainer for a student/teacher scorer pair
pub struct MeanTeacherTrainer<B: AutodiffBackend> {
    config: ExperimentConfig,
    vocab_size: usize,
    labels: Arc<LabelMap>,
    batcher: RelationBatcher<B>,
    eval_batcher: RelationBatcher<B::InnerBackend>,
    store: CheckpointStore,
    /// Current training state
    pub state: TrainingState,
}

impl<B: AutodiffBackend> MeanTeacherTrainer<B> {
    /// `labels` must already carry the ignore set used for scoring
    pub fn new(
        config: ExperimentConfig,
        vocab: Arc<Vocabulary>,
        labels: Arc<LabelMap>,
        device: B::Device,
    ) -> Self {
        let store = CheckpointStore::new(config.data.output_dir.clone());
        Self {
            vocab_size: vocab.len(),
            batcher: RelationBatcher::new(vocab.clone(), labels.clone(), device.clone()),
            eval_batcher: RelationBatcher::new(vocab, labels.clone(), device),
            labels,
            store,
            config,
            state: TrainingState::default(),
        }
    }

    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run the full protocol starting from `student`.
    ///
    /// The best teacher (or single model) is written to the output directory
    /// whenever dev F1 strictly improves.
    pub fn fit<M>(&mut self, student: M, data: &TrainingData) -> Result<TrainingSummary>
    where
        M: AutodiffModule<B> + Scorer<B>,
        M::InnerModule: Scorer<B::InnerBackend>,
    {
        if data.train.is_empty() {
            return Err(RelExtError::Training("training set is empty".to_string()));
        }

        let mode = self.config.mean_teacher.mode();
        let training = self.config.training.clone();
        let mean_teacher = self.config.mean_teacher.clone();
        let batch_size = training.batch_size;

        let rampup_steps = mean_teacher.rampup_epochs * data.train.len().div_ceil(batch_size);
        let mut student = student;
        let mut teacher = (mode == TrainingMode::MeanTeacher).then(|| student.clone());
        let mut optimizer = AdaGradConfig::new().init::<B, M>();
        let mut active: Vec<usize> = (0..data.train.len()).collect();
        let mut stopped_early = false;

        info!(
            "Training {} examples ({} mode, {} epochs, batch size {})",
            data.train.len(),
            mode,
            training.epochs,
            batch_size
        );

        for epoch_idx in 0..training.epochs {
            let epoch = epoch_idx + 1;
            let epoch_seed = training.seed + epoch as u64;
            B::seed(epoch_seed);
            let mut rng = ChaCha8Rng::seed_from_u64(epoch_seed);

            let order = block_shuffle(&active, batch_size, |&i| data.train[i].len(), &mut rng);
            let ranges = batch_ranges(order.len(), batch_size);
            info!(
                "Epoch {}/{}: {} examples in {} batches",
                epoch,
                training.epochs,
                order.len(),
                ranges.len()
            );

            let progress = self.progress_bar(ranges.len());
            let mut loss_total = 0.0;
            let mut max_norm = 0.0f64;
            let mut last_alpha = None;

            for range in &ranges {
                let batch = self
                    .batcher
                    .build(order[range.clone()].iter().map(|&i| &data.train[i]), true)?;
                let targets = batch.targets().context("training batch has no labels")?;
                let size = batch.batch_size();

                let logits = student.score(&batch);
                let nll = log_softmax(logits.clone(), 1)
                    .gather(1, targets.reshape([size, 1]))
                    .mean()
                    .neg();
                let loss = match &teacher {
                    Some(teacher) => {
                        let teacher_probs = softmax(teacher.score(&batch), 1).detach();
                        let consistency = (softmax(logits, 1) - teacher_probs)
                            .powf_scalar(2.0)
                            .sum()
                            .div_scalar(size as f64);
                        nll + consistency
                    }
                    None => nll,
                };

                let loss_value: f64 = loss.clone().into_scalar().elem();
                if !loss_value.is_finite() {
                    return Err(RelExtError::Training(format!(
                        "loss became {} at step {}",
                        loss_value, self.state.global_step
                    )));
                }
                loss_total += loss_value;

                let grads = GradientsParams::from_grads(loss.backward(), &student);
                let (grads, norm) = clip_grad_norm::<B, M>(&student, grads, training.max_grad_norm);
                max_norm = max_norm.max(norm);
                student = optimizer.step(training.learning_rate, student, grads);

                if let Some(current) = teacher.take() {
                    let decay = rampup_decay(self.state.global_step, rampup_steps, mean_teacher.alpha);
                    let (updated, stats) =
                        apply_ema(current, &NamedParameters::collect(&student), decay);
                    if stats.missing > 0 {
                        return Err(RelExtError::Training(format!(
                            "{} teacher parameters have no student counterpart",
                            stats.missing
                        )));
                    }
                    teacher = Some(updated);
                    last_alpha = Some(decay);
                }
                self.state.global_step += 1;
                progress.inc(1);
            }
            progress.finish_and_clear();

            let train_loss = loss_total / ranges.len().max(1) as f64;
            info!("Training loss: {:.4}", train_loss);

            let eval_model = teacher.as_ref().unwrap_or(&student).valid();

            B::seed(training.seed);
            let (dev, _) = self.evaluate(&eval_model, &data.dev)?;
            let dev_f1 = round3(dev.f1);
            info!("Dev   {}", dev);

            let improved = self.state.record_dev_f1(epoch, epoch_seed, dev_f1);
            if improved {
                let metadata = CheckpointMetadata {
                    epoch,
                    seed: epoch_seed,
                    dev_f1,
                    mode,
                    model: self.config.model.clone(),
                    features: self.config.features.clone(),
                    num_labels: self.labels.len(),
                    vocab_size: self.vocab_size,
                    saved_at: Local::now(),
                };
                self.store
                    .save::<B::InnerBackend, _>(eval_model.clone(), &metadata)?;
            }

            B::seed(training.seed);
            let (test, _) = self.evaluate(&eval_model, &data.test)?;
            info!("Test  {}", test);

            self.state.epoch = epoch;
            let mut record = EpochRecord {
                epoch,
                seed: epoch_seed,
                train_loss,
                active_examples: active.len(),
                dev,
                test,
                alpha: last_alpha,
                max_grad_norm: max_norm,
                improved,
                filter: None,
            };

            if self.state.should_stop(epoch, training.early_stop_patience) {
                info!(
                    "No dev improvement since epoch {}, stopping",
                    self.state.best_epoch
                );
                self.state.history.push(record);
                stopped_early = true;
                break;
            }

            if mode == TrainingMode::MeanTeacher && mean_teacher.filtering {
                B::seed(training.seed);
                let scores = predict(&eval_model, &data.train, &self.eval_batcher, batch_size)?;
                let (kept, report) =
                    filter_examples(&data.train, &scores, &self.labels, mean_teacher.top_k);
                info!(
                    "Filtering kept {}/{} examples ({} positive, {} no-relation dropped)",
                    report.kept,
                    report.total,
                    report.dropped_positive,
                    report.dropped_ignored
                );
                if kept.is_empty() {
                    warn!("Filtering removed every example; keeping the previous training set");
                } else {
                    active = kept;
                }
                record.filter = Some(report);
            }

            self.state.history.push(record);
        }

        info!(
            "Best epoch {} (seed {}) with dev F1 {:.3}",
            self.state.best_epoch, self.state.best_seed, self.state.best_dev_f1
        );

        Ok(TrainingSummary {
            mode,
            best_epoch: self.state.best_epoch,
            best_seed: self.state.best_seed,
            best_dev_f1: self.state.best_dev_f1,
            epochs_run: self.state.epoch,
            stopped_early,
            history: self.state.history.clone(),
        })
    }

    /// Score `examples` at threshold 0; returns the score and the raw rows
    fn evaluate<S>(&self, model: &S, examples: &[RelationExample]) -> Result<(PrfScore, Vec<Vec<f32>>)>
    where
        S: Scorer<B::InnerBackend>,
    {
        let scores = predict(model, examples, &self.eval_batcher, self.config.training.batch_size)?;
        let gold: Vec<&str> = examples.iter().map(|e| e.relation.as_str()).collect();
        let counts = score_threshold(&gold, &scores, &self.labels, 0.0);
        debug!(
            "predicted {} / gold {} / correct {}",
            counts.predicted, counts.gold, counts.correct
        );
        Ok((counts.score(), scores))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.training.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    use super::*;
    use crate::config::TrainingConfig;
    use crate::dataset::features::{ArgSpan, FeatureExtractor};
    use crate::model::config::{Architecture, ModelConfig};
    use crate::model::layers::ScorerDims;
    use crate::model::RelationClassifier;

    type TestBackend = Autodiff<NdArray<f32>>;
    type InferenceBackend = NdArray<f32>;

    fn corpus() -> (Vec<RelationExample>, Vocabulary, LabelMap) {
        let fx = FeatureExtractor::default();
        let rows = [
            ("John works at Acme", (0, 0), (3, 3), "employer"),
            ("Mary joined Globex last year", (0, 0), (2, 2), "employer"),
            ("Paris is in France", (0, 0), (3, 3), "located_in"),
            ("Berlin lies in Germany", (0, 0), (3, 3), "located_in"),
            ("Tom met Ann", (0, 0), (2, 2), "None"),
            ("Acme sued Globex again", (0, 0), (2, 2), "None"),
            ("Lee works for Initech now", (0, 0), (3, 3), "employer"),
        ];
        let mut vocab = Vocabulary::new();
        let mut examples = Vec::new();
        for (i, (text, a1, a2, rel)) in rows.into_iter().enumerate() {
            for word in text.split_whitespace() {
                vocab.insert(word);
            }
            let words: Vec<&str> = text.split_whitespace().collect();
            let example = fx
                .extract(
                    text,
                    words[a1.1],
                    words[a2.1],
                    ArgSpan::new(a1.0, a1.1),
                    ArgSpan::new(a2.0, a2.1),
                    rel,
                )
                .unwrap()
                .with_source(i + 1, serde_json::json!(i));
            examples.push(example);
        }
        let labels = LabelMap::from_names(["employer", "located_in", "None"]).with_ignored(["None"]);
        (examples, vocab, labels)
    }

    fn config(output: &std::path::Path, enabled: bool) -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.data.output_dir = output.to_path_buf();
        config.training = TrainingConfig {
            early_stop_patience: 10,
            ..TrainingConfig::debug()
        };
        config.mean_teacher.enabled = enabled;
        config.model = ModelConfig {
            architecture: Architecture::Pcnn,
            word_embed_dim: 8,
            distance_embed_dim: 2,
            num_filters: 6,
            ..Default::default()
        };
        config
    }

    fn run(enabled: bool) -> (tempfile::TempDir, TrainingSummary, ScorerDims, ExperimentConfig) {
        let dir = tempfile::tempdir().unwrap();
        let (examples, vocab, labels) = corpus();
        let config = config(dir.path(), enabled);
        let dims = ScorerDims {
            vocab_size: vocab.len(),
            distance_vocab_size: config.features.distance_vocab_size(),
            num_labels: labels.len(),
        };
        let device = Default::default();
        let student = RelationClassifier::<TestBackend>::new(&config.model, dims, None, &device).unwrap();

        let data = TrainingData {
            train: examples.clone(),
            dev: examples[..4].to_vec(),
            test: examples[3..].to_vec(),
        };
        let mut trainer =
            MeanTeacherTrainer::<TestBackend>::new(config.clone(), Arc::new(vocab), Arc::new(labels), device);
        let summary = trainer.fit(student, &data).unwrap();
        (dir, summary, dims, config)
    }

    #[test]
    fn test_state_tracks_strict_improvement() {
        let mut state = TrainingState::default();
        assert!(state.record_dev_f1(1, 11, 0.0));
        assert!(!state.record_dev_f1(2, 12, 0.0));
        assert!(state.record_dev_f1(3, 13, 0.25));
        assert_eq!((state.best_epoch, state.best_seed), (3, 13));

        assert!(!state.should_stop(4, 2));
        assert!(state.should_stop(5, 2));
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round3(0.9996), 1.0);
    }

    #[test]
    fn test_mean_teacher_two_epochs_end_to_end() {
        let (dir, summary, dims, config) = run(true);

        assert_eq!(summary.mode, TrainingMode::MeanTeacher);
        assert_eq!(summary.epochs_run, 2);
        assert_eq!(summary.history.len(), 2);
        assert!(summary.best_epoch >= 1);
        assert_eq!(summary.history[0].seed, config.training.seed + 1);
        assert_eq!(summary.history[0].active_examples, 7);
        assert!(summary.history[1].active_examples <= 7);
        for record in &summary.history {
            assert!(record.train_loss.is_finite());
            let alpha = record.alpha.unwrap();
            assert!(alpha > 0.0 && alpha < config.mean_teacher.alpha);
            assert!(record.filter.is_some());
        }

        let store = CheckpointStore::new(dir.path());
        assert!(store.exists());
        let meta = store.load_metadata().unwrap();
        assert_eq!(meta.epoch, summary.best_epoch);
        assert_eq!(meta.dims(), dims);

        let device = Default::default();
        let fresh = RelationClassifier::<InferenceBackend>::new(&meta.model, meta.dims(), None, &device).unwrap();
        assert!(store.load_model(fresh, &device).is_ok());
    }

    #[test]
    fn test_same_seed_reproduces_history() {
        let (examples, vocab, labels) = corpus();
        let (vocab, labels) = (Arc::new(vocab), Arc::new(labels));
        let data = TrainingData {
            train: examples.clone(),
            dev: examples[..4].to_vec(),
            test: examples[3..].to_vec(),
        };
        let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
        let configs = dirs.each_ref().map(|dir| {
            let mut config = config(dir.path(), true);
            // no dropout draws, so batch order is the only randomness
            config.model.dropout_rate = 0.0;
            config
        });
        let dims = ScorerDims {
            vocab_size: vocab.len(),
            distance_vocab_size: configs[0].features.distance_vocab_size(),
            num_labels: labels.len(),
        };
        let device: <TestBackend as Backend>::Device = Default::default();
        let student =
            RelationClassifier::<TestBackend>::new(&configs[0].model, dims, None, &device).unwrap();

        let [first, second] = configs.map(|config| {
            let mut trainer = MeanTeacherTrainer::<TestBackend>::new(
                config,
                vocab.clone(),
                labels.clone(),
                device.clone(),
            );
            trainer.fit(student.clone(), &data).unwrap()
        });

        assert_eq!(first.best_epoch, second.best_epoch);
        assert_eq!(first.best_seed, second.best_seed);
        assert!((first.best_dev_f1 - second.best_dev_f1).abs() < 1e-9);
        assert_eq!(first.history.len(), second.history.len());
        for (a, b) in first.history.iter().zip(&second.history) {
            assert_eq!(a.seed, b.seed);
            assert_eq!(a.active_examples, b.active_examples);
            assert!((a.train_loss - b.train_loss).abs() < 1e-9);
            assert!((a.dev.f1 - b.dev.f1).abs() < 1e-9);
            assert!((a.test.f1 - b.test.f1).abs() < 1e-9);
            assert_eq!(a.improved, b.improved);
            assert_eq!(a.filter, b.filter);
        }
    }

    #[test]
    fn test_supervised_mode_skips_teacher() {
        let (dir, summary, _, _) = run(false);

        assert_eq!(summary.mode, TrainingMode::Supervised);
        for record in &summary.history {
            assert!(record.alpha.is_none());
            assert!(record.filter.is_none());
            assert_eq!(record.active_examples, 7);
        }
        let meta = CheckpointStore::new(dir.path()).load_metadata().unwrap();
        assert_eq!(meta.mode, TrainingMode::Supervised);
    }
}
