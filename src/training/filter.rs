//! Confidence-based self-filtering of the training set
//!
//! After each epoch the teacher re-scores the full training corpus. An
//! example stays in the active set when the teacher still backs its gold
//! label: either the label is among the top-K predictions, or the label is a
//! "no relation" label and it is the single top prediction.

use serde::{Deserialize, Serialize};

use crate::dataset::corpus::LabelMap;
use crate::dataset::features::RelationExample;

/// Indices of the `k` highest scores, best first; ties keep the lower index first
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order
}

/// Decide whether one example survives filtering
pub fn keep_example(gold: usize, gold_ignored: bool, scores: &[f32], k: usize) -> bool {
    let top = top_k_indices(scores, k);
    if gold_ignored {
        top.first() == Some(&gold)
    } else {
        top.contains(&gold)
    }
}

/// What a filtering pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub total: usize,
    pub kept: usize,
    /// Dropped examples whose gold label is a "no relation" label
    pub dropped_ignored: usize,
    /// Dropped examples with a positive gold label
    pub dropped_positive: usize,
    /// Examples whose gold label is not in the label map
    pub unknown_labels: usize,
}

impl FilterReport {
    pub fn dropped(&self) -> usize {
        self.total - self.kept
    }
}

/// Indices (into `examples`) of the examples that stay active.
///
/// `scores[i]` must be the teacher's score row for `examples[i]`. Examples
/// with a label unknown to `labels` are dropped.
pub fn filter_examples(
    examples: &[RelationExample],
    scores: &[Vec<f32>],
    labels: &LabelMap,
    k: usize,
) -> (Vec<usize>, FilterReport) {
    let mut report = FilterReport {
        total: examples.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(examples.len());

    for (index, (example, row)) in examples.iter().zip(scores).enumerate() {
        let Some(gold) = labels.get(&example.relation) else {
            report.unknown_labels += 1;
            continue;
        };
        let ignored = labels.is_ignored(&example.relation);
        if keep_example(gold, ignored, row, k) {
            kept.push(index);
        } else if ignored {
            report.dropped_ignored += 1;
        } else {
            report.dropped_positive += 1;
        }
    }

    report.kept = kept.len();
    (kept, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::features::{ArgSpan, FeatureExtractor};

    fn labels() -> LabelMap {
        LabelMap::from_names(["A", "B", "C", "None"]).with_ignored(["None"])
    }

    fn example(relation: &str) -> RelationExample {
        FeatureExtractor::default()
            .extract(
                "John works at Acme",
                "John",
                "Acme",
                ArgSpan::new(0, 0),
                ArgSpan::new(3, 3),
                relation,
            )
            .unwrap()
    }

    #[test]
    fn test_top_k_order_and_ties() {
        let scores = [0.1, 0.4, 0.4, 0.1];
        assert_eq!(top_k_indices(&scores, 2), vec![1, 2]);
        assert_eq!(top_k_indices(&scores, 3), vec![1, 2, 0]);
        assert_eq!(top_k_indices(&scores, 10).len(), 4);
        assert!(top_k_indices(&scores, 0).is_empty());
    }

    #[test]
    fn test_keep_rules() {
        let scores = [0.1, 0.5, 0.3, 0.1];
        // positive gold inside the top-2
        assert!(keep_example(2, false, &scores, 2));
        // positive gold outside the top-2
        assert!(!keep_example(0, false, &scores, 2));
        // ignored gold must be the top-1, not merely in the top-K
        assert!(!keep_example(2, true, &scores, 3));
        assert!(keep_example(1, true, &scores, 3));
    }

    #[test]
    fn test_filter_yields_subset() {
        let examples = vec![example("A"), example("None"), example("B"), example("X")];
        let scores = vec![
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.6, 0.1, 0.1, 0.2],
            vec![0.1, 0.1, 0.2, 0.6],
            vec![0.25, 0.25, 0.25, 0.25],
        ];
        let (kept, report) = filter_examples(&examples, &scores, &labels(), 2);

        assert_eq!(kept, vec![0]);
        assert!(kept.iter().all(|&i| i < examples.len()));
        assert_eq!(report.total, 4);
        assert_eq!(report.kept, 1);
        assert_eq!(report.dropped_ignored, 1);
        assert_eq!(report.dropped_positive, 1);
        assert_eq!(report.unknown_labels, 1);
        assert_eq!(report.dropped(), 3);
    }
}
