//! Relation extraction metrics
//!
//! Positive-class precision/recall/F1 where "positive" means a relation
//! outside the ignore set (e.g. `None`). A prediction only counts as
//! positive when its top score also clears the decision threshold.
//!
//! Also provides the threshold search used on the dev set, a PR-curve sweep
//! with CSV export, and area-under-curve over a standardized PR curve.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::corpus::LabelMap;
use crate::utils::error::Result;

/// Stabilizer for precision/recall/F1 denominators
pub const EPSILON: f64 = 1e-8;

/// Grid step of [`best_threshold`]
pub const THRESHOLD_STEP: f64 = 0.01;

/// Grid step of the exported PR curve
pub const PR_CURVE_STEP: f64 = 0.001;

/// Raw positive-class counts at one threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositiveCounts {
    pub predicted: usize,
    pub gold: usize,
    pub correct: usize,
}

impl PositiveCounts {
    pub fn precision(&self) -> f64 {
        self.correct as f64 / (self.predicted as f64 + EPSILON)
    }

    pub fn recall(&self) -> f64 {
        self.correct as f64 / (self.gold as f64 + EPSILON)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        2.0 * p * r / (p + r + EPSILON)
    }

    pub fn score(&self) -> PrfScore {
        PrfScore {
            precision: self.precision(),
            recall: self.recall(),
            f1: self.f1(),
        }
    }
}

/// Precision / recall / F1 triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PrfScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl std::fmt::Display for PrfScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "P: {:.3}  R: {:.3}  F1: {:.3}",
            self.precision, self.recall, self.f1
        )
    }
}

/// Index and value of the largest score; the first index wins ties
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
}

/// Count predicted, gold and correct positives at `threshold`.
///
/// Gold labels outside the label map cannot be predicted, so they only add
/// to the gold positives.
pub fn score_threshold<S: AsRef<str>>(
    gold: &[S],
    scores: &[Vec<f32>],
    labels: &LabelMap,
    threshold: f64,
) -> PositiveCounts {
    let mut counts = PositiveCounts::default();

    for (gold_name, row) in gold.iter().zip(scores) {
        let gold_name = gold_name.as_ref();
        let gold_positive = !labels.is_ignored(gold_name);
        if gold_positive {
            counts.gold += 1;
        }

        let Some((pred_id, max_score)) = argmax(row) else {
            continue;
        };
        let pred_name = labels.name(pred_id).unwrap_or_default();
        let pred_positive = !labels.is_ignored(pred_name) && f64::from(max_score) > threshold;
        if pred_positive {
            counts.predicted += 1;
            if gold_positive && pred_name == gold_name {
                counts.correct += 1;
            }
        }
    }

    counts
}

/// Gold labels that are not part of the label map
pub fn count_unrecognized<S: AsRef<str>>(gold: &[S], labels: &LabelMap) -> usize {
    gold.iter().filter(|g| !labels.contains(g.as_ref())).count()
}

/// Sweep thresholds `0.00, 0.01, .., 0.99` and keep the first one with the
/// highest F1.
pub fn best_threshold<S: AsRef<str>>(
    gold: &[S],
    scores: &[Vec<f32>],
    labels: &LabelMap,
) -> (f64, PrfScore) {
    let steps = (1.0 / THRESHOLD_STEP).round() as usize;
    let mut best = (0.0, PrfScore { f1: -1.0, ..Default::default() });

    for i in 0..steps {
        let threshold = i as f64 * THRESHOLD_STEP;
        let score = score_threshold(gold, scores, labels, threshold).score();
        if score.f1 > best.1.f1 {
            best = (threshold, score);
        }
    }

    best
}

/// One point on a precision-recall sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrPoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Evaluate every threshold from 0 to 1 inclusive in `step` increments
pub fn pr_curve<S: AsRef<str>>(
    gold: &[S],
    scores: &[Vec<f32>],
    labels: &LabelMap,
    step: f64,
) -> Vec<PrPoint> {
    let steps = (1.0 / step).round() as usize;
    (0..=steps)
        .map(|i| {
            let threshold = i as f64 * step;
            let score = score_threshold(gold, scores, labels, threshold).score();
            PrPoint {
                threshold,
                precision: score.precision,
                recall: score.recall,
                f1: score.f1,
            }
        })
        .collect()
}

/// Write a PR sweep as `Threshold,Prec.,Rec.,F1` CSV
pub fn write_pr_curve(points: &[PrPoint], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Threshold,Prec.,Rec.,F1")?;
    for point in points {
        writeln!(
            writer,
            "{:.3},{:.4},{:.4},{:.4}",
            point.threshold, point.precision, point.recall, point.f1
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Snap a PR sweep onto a 0.01 recall grid.
///
/// For each grid recall, the precision of the nearest sweep point within
/// 0.01 is kept; grid points with no such point (or zero precision) are
/// dropped. Returns `(recall, precision)` pairs in increasing recall.
pub fn standardize_pr_curve(points: &[PrPoint]) -> Vec<(f64, f64)> {
    const GRID: f64 = 0.01;
    let mut standardized = Vec::new();

    for i in 0..=100 {
        let recall = i as f64 * GRID;
        let nearest = points
            .iter()
            .map(|p| ((p.recall - recall).abs(), p.precision))
            .filter(|(diff, _)| *diff < GRID)
            .fold(None, |best: Option<(f64, f64)>, cand| match best {
                Some(b) if b.0 <= cand.0 => Some(b),
                _ => Some(cand),
            });
        if let Some((_, precision)) = nearest {
            if precision != 0.0 {
                standardized.push((recall, precision));
            }
        }
    }

    standardized
}

/// Write a standardized curve as `Rec.,Prec.` CSV
pub fn write_standardized_pr_curve(curve: &[(f64, f64)], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Rec.,Prec.")?;
    for (recall, precision) in curve {
        writeln!(writer, "{:.2},{:.4}", recall, precision)?;
    }
    writer.flush()?;
    Ok(())
}

/// Trapezoid area under `(recall, precision)` pairs, restricted to points
/// with precision >= `min_precision` and recall >= `min_recall`
pub fn area_under_curve(curve: &[(f64, f64)], min_precision: f64, min_recall: f64) -> f64 {
    let kept: Vec<(f64, f64)> = curve
        .iter()
        .copied()
        .filter(|&(r, p)| p >= min_precision && r >= min_recall)
        .collect();

    kept.windows(2)
        .map(|w| 0.5 * (w[0].1 + w[1].1) * (w[1].0 - w[0].0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelMap {
        LabelMap::from_names(["A", "B", "None"]).with_ignored(["None", "NA", "Other"])
    }

    #[test]
    fn test_two_example_threshold_contrast() {
        let labels = labels();
        let gold = ["A", "None"];
        // gold A predicted A at 0.9; gold None predicted B at 0.4
        let scores = vec![vec![0.9, 0.05, 0.05], vec![0.3, 0.4, 0.3]];

        let at_half = score_threshold(&gold, &scores, &labels, 0.5);
        assert_eq!(at_half, PositiveCounts { predicted: 1, gold: 1, correct: 1 });
        let s = at_half.score();
        assert!((s.precision - 1.0).abs() < 1e-6);
        assert!((s.recall - 1.0).abs() < 1e-6);
        assert!((s.f1 - 1.0).abs() < 1e-6);

        // at 0.0 the spurious B prediction counts against precision
        let at_zero = score_threshold(&gold, &scores, &labels, 0.0);
        assert_eq!(at_zero.predicted, 2);
        assert!(at_zero.f1() < s.f1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let labels = labels();
        let gold = ["A"];
        let scores = vec![vec![0.5, 0.25, 0.25]];
        assert_eq!(score_threshold(&gold, &scores, &labels, 0.5).predicted, 0);
        assert_eq!(score_threshold(&gold, &scores, &labels, 0.49).predicted, 1);
    }

    #[test]
    fn test_ignored_prediction_never_positive() {
        let labels = labels();
        let gold = ["None", "B"];
        let scores = vec![vec![0.1, 0.1, 0.8], vec![0.1, 0.1, 0.8]];
        let counts = score_threshold(&gold, &scores, &labels, 0.0);
        assert_eq!(counts, PositiveCounts { predicted: 0, gold: 1, correct: 0 });
        // empty sets stay finite
        assert_eq!(counts.precision(), 0.0);
        assert_eq!(counts.f1(), 0.0);
    }

    #[test]
    fn test_unrecognized_gold_counts_as_positive() {
        let labels = labels();
        let gold = ["/unknown/relation", "A"];
        let scores = vec![vec![0.8, 0.1, 0.1], vec![0.8, 0.1, 0.1]];
        let counts = score_threshold(&gold, &scores, &labels, 0.0);
        assert_eq!(counts, PositiveCounts { predicted: 2, gold: 2, correct: 1 });
        assert_eq!(count_unrecognized(&gold, &labels), 1);
    }

    #[test]
    fn test_best_threshold_in_unit_range_and_not_worse_than_zero() {
        let labels = labels();
        let gold = ["A", "None", "B", "A", "None"];
        let scores = vec![
            vec![0.9, 0.05, 0.05],
            vec![0.3, 0.4, 0.3],
            vec![0.2, 0.7, 0.1],
            vec![0.1, 0.6, 0.3],
            vec![0.55, 0.1, 0.35],
        ];
        let (threshold, best) = best_threshold(&gold, &scores, &labels);
        assert!((0.0..1.0).contains(&threshold));
        let at_zero = score_threshold(&gold, &scores, &labels, 0.0).f1();
        assert!(best.f1 >= at_zero - 1e-9);
        // only thresholds in [0.61, 0.69] keep the two correct predictions alone
        assert!(threshold > 0.6 && threshold < 0.7);
        assert!((best.f1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_best_threshold_ties_keep_lowest() {
        let labels = labels();
        let gold = ["A"];
        let scores = vec![vec![0.95, 0.03, 0.02]];
        let (threshold, score) = best_threshold(&gold, &scores, &labels);
        assert_eq!(threshold, 0.0);
        assert!((score.f1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pr_curve_csv() {
        let labels = labels();
        let gold = ["A"];
        let scores = vec![vec![0.9, 0.05, 0.05]];
        let points = pr_curve(&gold, &scores, &labels, PR_CURVE_STEP);
        assert_eq!(points.len(), 1001);
        assert!((points.last().unwrap().threshold - 1.0).abs() < 1e-12);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-pr.csv");
        write_pr_curve(&points, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("Threshold,Prec.,Rec.,F1"));
        assert_eq!(lines.next(), Some("0.000,1.0000,1.0000,1.0000"));
        assert_eq!(content.lines().count(), 1002);
    }

    #[test]
    fn test_standardized_curve_and_auc() {
        let points: Vec<PrPoint> = [(1.0, 0.0), (0.8, 0.5), (0.6, 1.0)]
            .iter()
            .enumerate()
            .map(|(i, &(precision, recall))| PrPoint {
                threshold: i as f64,
                precision,
                recall,
                f1: 0.0,
            })
            .collect();
        let curve = standardize_pr_curve(&points);
        assert_eq!(curve.len(), 3);
        assert!((curve[1].0 - 0.5).abs() < 1e-9);

        // trapezoids: 0.5 * (1.0 + 0.8) * 0.5 + 0.5 * (0.8 + 0.6) * 0.5
        let auc = area_under_curve(&curve, 0.0, 0.0);
        assert!((auc - 0.8).abs() < 1e-9);
        let clipped = area_under_curve(&curve, 0.0, 0.4);
        assert!((clipped - 0.35).abs() < 1e-9);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-pr-std.csv");
        write_standardized_pr_curve(&curve, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().collect::<Vec<_>>(), ["Rec.,Prec.", "0.00,1.0000", "0.50,0.8000", "1.00,0.6000"]);
    }
}
