//! Relation extraction CLI
//!
//! Entry point for training mean-teacher relation classifiers and evaluating
//! one checkpoint or an ensemble of checkpoints.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use relext_ssl::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use relext_ssl::config::ExperimentConfig;
use relext_ssl::inference::{run_evaluation, EvaluationReport};
use relext_ssl::model::Architecture;
use relext_ssl::training::{run_training, TrainingSummary};
use relext_ssl::utils::logging::{init_logging, LogConfig};
use relext_ssl::utils::{format_duration, format_score_bar};

/// Mean-Teacher Relation Extraction
///
/// Trains relation classifiers on distantly supervised corpora with an EMA
/// teacher and top-K label filtering, using the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "relext_ssl")]
#[command(author = "Warre Snaet")]
#[command(version)]
#[command(about = "Mean-teacher relation extraction with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug)]
struct CommonArgs {
    /// TOML experiment configuration (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the corpus splits and relation file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Directory receiving checkpoints, logs and reports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Batch size for training and scoring
    #[arg(short, long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model and keep the checkpoint with the best dev F1
    Train {
        #[command(flatten)]
        common: CommonArgs,

        /// Scorer architecture
        #[arg(short, long, value_enum)]
        architecture: Option<Architecture>,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Pretrained word vectors, relative to the data directory
        #[arg(long)]
        embedding_file: Option<String>,

        /// Train a single model without teacher, EMA or filtering
        #[arg(long, default_value = "false")]
        supervised: bool,

        /// Keep the mean teacher but never filter the training set
        #[arg(long, default_value = "false")]
        no_filter: bool,

        /// Filtering keeps mentions whose gold label is in the teacher's top K
        #[arg(long)]
        top_k: Option<usize>,

        /// Hide the per-batch progress bar
        #[arg(long, default_value = "false")]
        no_progress: bool,
    },

    /// Evaluate a trained checkpoint on dev and test
    Test {
        #[command(flatten)]
        common: CommonArgs,

        /// Checkpoint directory (defaults to the output directory)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },

    /// Evaluate the averaged scores of several checkpoints
    Ensemble {
        #[command(flatten)]
        common: CommonArgs,

        /// Checkpoint directories to average
        #[arg(short, long, num_args = 1.., required = true)]
        models: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            common,
            architecture,
            epochs,
            embedding_file,
            supervised,
            no_filter,
            top_k,
            no_progress,
        } => {
            let mut config = load_config(&common, None)?;
            if let Some(architecture) = architecture {
                config.model.architecture = architecture;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if embedding_file.is_some() {
                config.data.embedding_file = embedding_file;
            }
            if supervised {
                config.mean_teacher.enabled = false;
            }
            if no_filter {
                config.mean_teacher.filtering = false;
            }
            if let Some(top_k) = top_k {
                config.mean_teacher.top_k = top_k;
            }
            if no_progress {
                config.training.show_progress = false;
            }
            config.validate()?;

            start_logging(&config, cli.verbose, "training.log")?;
            print_banner();
            cmd_train(&config)?;
        }

        Commands::Test { common, model_dir } => {
            let model_dir = model_dir
                .or_else(|| common.output_dir.clone())
                .unwrap_or_else(|| ExperimentConfig::default().data.output_dir);
            let config = load_config(&common, Some(&model_dir))?;

            start_logging(&config, cli.verbose, "test.log")?;
            print_banner();
            cmd_evaluate(&config, &[model_dir])?;
        }

        Commands::Ensemble { common, models } => {
            let config = load_config(&common, models.first().map(PathBuf::as_path))?;

            start_logging(&config, cli.verbose, "test.log")?;
            print_banner();
            cmd_evaluate(&config, &models)?;
        }
    }

    Ok(())
}

/// Read the TOML file and apply the shared overrides.
///
/// Without `--config`, evaluation starts from the configuration saved in
/// `model_dir` at training time.
fn load_config(common: &CommonArgs, model_dir: Option<&Path>) -> Result<ExperimentConfig> {
    let mut config = match (&common.config, model_dir) {
        (Some(path), _) => ExperimentConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        (None, Some(dir)) => ExperimentConfig::load_saved(dir)
            .with_context(|| format!("failed to load the config saved in {}", dir.display()))?,
        (None, None) => ExperimentConfig::default(),
    };

    if let Some(data_dir) = &common.data_dir {
        config.data.data_dir = data_dir.clone();
    }
    if let Some(output_dir) = &common.output_dir {
        config.data.output_dir = output_dir.clone();
    }
    if let Some(seed) = common.seed {
        config.training.seed = seed;
    }
    if let Some(batch_size) = common.batch_size {
        config.training.batch_size = batch_size;
    }
    config.validate()?;
    Ok(config)
}

fn start_logging(config: &ExperimentConfig, verbose: bool, log_name: &str) -> Result<()> {
    let base = if verbose {
        LogConfig::verbose()
    } else {
        config.logging.clone()
    };
    let log_config = if base.log_file.is_some() {
        base
    } else {
        base.with_log_file(config.data.output_dir.join(log_name))
    };
    init_logging(&log_config)?;
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════════╗
 ║   Mean-Teacher Relation Extraction                               ║
 ║   Noisy-label self-filtering with Burn + Rust                    ║
 ╚══════════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(config: &ExperimentConfig) -> Result<()> {
    info!("Backend: {}", backend_name());
    info!(
        "Training {} ({}) on {}",
        config.model.architecture,
        config.mean_teacher.mode(),
        config.data.data_dir.display()
    );

    let started = Instant::now();
    let summary = run_training::<TrainingBackend>(config, &default_device())
        .context("training failed")?;
    print_training_summary(&summary, &config.data.output_dir);
    println!(
        "  {} {}",
        "Elapsed:".cyan(),
        format_duration(started.elapsed().as_secs_f64())
    );
    Ok(())
}

fn cmd_evaluate(config: &ExperimentConfig, model_dirs: &[PathBuf]) -> Result<()> {
    info!("Backend: {}", backend_name());
    let started = Instant::now();
    let report = run_evaluation::<DefaultBackend>(config, model_dirs, &default_device())
        .context("evaluation failed")?;
    print_evaluation_report(&report, &config.data.output_dir);
    println!(
        "  {} {}",
        "Elapsed:".cyan(),
        format_duration(started.elapsed().as_secs_f64())
    );
    Ok(())
}

fn print_training_summary(summary: &TrainingSummary, output_dir: &Path) {
    println!();
    println!("{}", "Training complete".green().bold());
    println!("  {} {}", "Mode:".cyan(), summary.mode);
    println!(
        "  {} {} of {}{}",
        "Best epoch:".cyan(),
        summary.best_epoch,
        summary.epochs_run,
        if summary.stopped_early {
            " (stopped early)".yellow().to_string()
        } else {
            String::new()
        }
    );
    println!("  {} {}", "Seed:".cyan(), summary.best_seed);
    println!(
        "  {} {:.3} {}",
        "Dev F1:".cyan(),
        summary.best_dev_f1,
        format_score_bar(summary.best_dev_f1, 30)
    );
    if let Some(last) = summary.history.last() {
        println!(
            "  {} {} active examples in the last epoch",
            "Train set:".cyan(),
            last.active_examples
        );
    }
    println!("  {} {}", "Checkpoint:".cyan(), output_dir.display());
}

fn print_evaluation_report(report: &EvaluationReport, output_dir: &Path) {
    println!();
    let title = if report.models.len() > 1 {
        format!("Ensemble of {} models", report.models.len())
    } else {
        "Evaluation".to_string()
    };
    println!("{}", title.green().bold());
    println!("  {} {}", "Dev  @ 0.00:".cyan(), report.dev_at_zero);
    println!(
        "  {} {}",
        format!("Dev  @ {:.2}:", report.threshold).cyan(),
        report.dev_at_threshold
    );
    println!("  {} {}", "Test @ 0.00:".cyan(), report.test_at_zero);
    println!(
        "  {} {}",
        format!("Test @ {:.2}:", report.threshold).cyan(),
        report.test_at_threshold
    );
    println!(
        "  {} {}",
        "F1:".cyan(),
        format_score_bar(report.test_at_threshold.f1, 30)
    );
    println!("  {} {:.4}", "AUC:".cyan(), report.auc);
    if report.unrecognized > 0 {
        println!(
            "  {} {} test mentions have labels outside the relation file",
            "Warning:".yellow(),
            report.unrecognized
        );
    }
    println!("  {} {}", "Outputs:".cyan(), output_dir.display());
}
