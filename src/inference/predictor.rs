//! Batched prediction and prediction files

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use burn::tensor::backend::Backend;
use serde::Serialize;
use tracing::{debug, info};

use crate::dataset::batcher::{batch_ranges, RelationBatcher};
use crate::dataset::corpus::LabelMap;
use crate::dataset::features::RelationExample;
use crate::model::Scorer;
use crate::utils::error::{RelExtError, Result};
use crate::utils::metrics::argmax;

/// Name written for predictions that do not clear the threshold
pub const NO_RELATION: &str = "None";

/// Softmax score rows for `examples`, in input order.
///
/// Runs on a non-autodiff backend, so dropout is inactive and no graph is
/// recorded. Batching follows the training rule: a trailing batch of one is
/// merged into the previous batch.
pub fn predict<B, S>(
    scorer: &S,
    examples: &[RelationExample],
    batcher: &RelationBatcher<B>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>>
where
    B: Backend,
    S: Scorer<B>,
{
    let mut rows = Vec::with_capacity(examples.len());

    for range in batch_ranges(examples.len(), batch_size) {
        let batch = batcher.build(&examples[range], false)?;
        let probs = scorer.score_probs(&batch);
        let [size, width] = probs.dims();
        let values: Vec<f32> = probs
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| RelExtError::Model(format!("failed to read scores: {:?}", e)))?;
        rows.extend(values.chunks(width).map(<[f32]>::to_vec));
        debug!("Scored batch of {} over {} labels", size, width);
    }

    Ok(rows)
}

/// Element-wise mean of several models' score rows
pub fn average_scores(runs: &[Vec<Vec<f32>>]) -> Result<Vec<Vec<f32>>> {
    let Some(first) = runs.first() else {
        return Err(RelExtError::Model("no score sets to average".to_string()));
    };

    let mut sum: Vec<Vec<f32>> = first.clone();
    for (run_index, run) in runs.iter().enumerate().skip(1) {
        if run.len() != sum.len() {
            return Err(RelExtError::Model(format!(
                "score set {} has {} rows, expected {}",
                run_index,
                run.len(),
                sum.len()
            )));
        }
        for (acc, row) in sum.iter_mut().zip(run) {
            if row.len() != acc.len() {
                return Err(RelExtError::Model(format!(
                    "score set {} has rows of width {}, expected {}",
                    run_index,
                    row.len(),
                    acc.len()
                )));
            }
            for (a, v) in acc.iter_mut().zip(row) {
                *a += v;
            }
        }
    }

    let n = runs.len() as f32;
    for row in &mut sum {
        for value in row.iter_mut() {
            *value /= n;
        }
    }
    Ok(sum)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictedMention<'a> {
    arg1_text: &'a str,
    arg2_text: &'a str,
    predicted_relation_name: &'a str,
    confidence: f32,
    relation_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SentencePrediction<'a> {
    sent_id: &'a serde_json::Value,
    sent_text: &'a str,
    predicted_relation_mentions: Vec<PredictedMention<'a>>,
}

/// Write one JSON line per source sentence, in first-seen sentence order.
///
/// A mention's predicted name is the top-scoring label, or [`NO_RELATION`]
/// when that score is at or below `threshold`.
pub fn write_predictions(
    path: &Path,
    examples: &[RelationExample],
    scores: &[Vec<f32>],
    labels: &LabelMap,
    threshold: f64,
) -> Result<()> {
    if examples.len() != scores.len() {
        return Err(RelExtError::Model(format!(
            "{} examples but {} score rows",
            examples.len(),
            scores.len()
        )));
    }

    let mut sentences: Vec<SentencePrediction> = Vec::new();
    let mut position: HashMap<String, usize> = HashMap::new();

    for (example, row) in examples.iter().zip(scores) {
        let (label_id, confidence) = argmax(row).unwrap_or((0, 0.0));
        let predicted = if f64::from(confidence) <= threshold {
            NO_RELATION
        } else {
            labels.name(label_id).unwrap_or(NO_RELATION)
        };
        let mention = PredictedMention {
            arg1_text: &example.arg1,
            arg2_text: &example.arg2,
            predicted_relation_name: predicted,
            confidence,
            relation_name: &example.relation,
        };

        let key = example.sent_id.to_string();
        let index = *position.entry(key).or_insert_with(|| {
            sentences.push(SentencePrediction {
                sent_id: &example.sent_id,
                sent_text: &example.text,
                predicted_relation_mentions: Vec::new(),
            });
            sentences.len() - 1
        });
        sentences[index].predicted_relation_mentions.push(mention);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for sentence in &sentences {
        serde_json::to_writer(&mut writer, sentence)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!(
        "Wrote predictions for {} sentences to {}",
        sentences.len(),
        path.display()
    );
    Ok(())
}
