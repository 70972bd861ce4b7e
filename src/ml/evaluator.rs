// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Scores the fitted classifier ONCE on the untouched test matrix.
// Takes FeatureMatrix<Test> only; there is no way to evaluate on
// the resampled training matrix by mistake.
//
// Positive class = churn.
//
//   confusion  [[tn, fp],
//               [fn, tp]]
//   precision  tp / (tp + fp)      0 when nothing is predicted positive
//   recall     tp / (tp + fn)      0 when there are no churners
//   f1         harmonic mean of precision and recall
//   roc_auc    rank statistic over the raw probabilities (threshold-free)
//
// Why report ROC-AUC next to accuracy?
//   With roughly one churner in four, predicting "stay" for
//   everyone already scores 0.75 accuracy. AUC ignores the
//   threshold and measures how well churners are ranked above
//   non-churners.
//
// Reference: Fawcett (2006), An introduction to ROC analysis

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::dataset::Test;
use crate::domain::feature_matrix::FeatureMatrix;
use crate::ml::model::{ChurnClassifier, InferBackend};
use crate::ml::trainer::predict_proba;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub threshold: f64,
    pub support:   usize,
    pub accuracy:  f64,
    pub precision: f64,
    pub recall:    f64,
    pub f1:        f64,
    /// None when the test partition holds a single class.
    pub roc_auc:   Option<f64>,
    pub confusion: [[usize; 2]; 2],
}

pub fn evaluate(
    model:     &ChurnClassifier<InferBackend>,
    test:      &FeatureMatrix<Test>,
    threshold: f64,
) -> Result<EvaluationMetrics> {
    let probs   = predict_proba(model, test.to_f32_row_major(), test.n_rows(), test.n_features())?;
    let metrics = metrics_from_probabilities(&probs, test.labels(), threshold);

    tracing::info!(
        "Test metrics (n={}): accuracy={:.3} precision={:.3} recall={:.3} f1={:.3} auc={}",
        metrics.support,
        metrics.accuracy,
        metrics.precision,
        metrics.recall,
        metrics.f1,
        metrics.roc_auc.map_or("n/a".to_string(), |a| format!("{a:.3}")),
    );
    Ok(metrics)
}

pub fn metrics_from_probabilities(probs: &[f64], labels: &[bool], threshold: f64) -> EvaluationMetrics {
    let (mut tn, mut fp, mut fn_, mut tp) = (0usize, 0usize, 0usize, 0usize);
    for (&p, &actual) in probs.iter().zip(labels) {
        match (p >= threshold, actual) {
            (false, false) => tn += 1,
            (true, false)  => fp += 1,
            (false, true)  => fn_ += 1,
            (true, true)   => tp += 1,
        }
    }

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let support   = tn + fp + fn_ + tp;
    let precision = ratio(tp, tp + fp);
    let recall    = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    EvaluationMetrics {
        threshold,
        support,
        accuracy: ratio(tp + tn, support),
        precision,
        recall,
        f1,
        roc_auc: roc_auc(probs, labels),
        confusion: [[tn, fp], [fn_, tp]],
    }
}

/// Mann-Whitney AUC with average ranks for ties.
pub fn roc_auc(probs: &[f64], labels: &[bool]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut pos_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        // ranks are 1-based: i+1 ..= j+1
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        pos_rank_sum += avg_rank * order[i..=j].iter().filter(|&&k| labels[k]).count() as f64;
        i = j + 1;
    }

    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_layout() {
        let probs  = [0.9, 0.8, 0.3, 0.2, 0.6];
        let labels = [true, false, true, false, true];
        let m = metrics_from_probabilities(&probs, &labels, 0.5);
        // tn=1 (0.2), fp=1 (0.8), fn=1 (0.3), tp=2 (0.9, 0.6)
        assert_eq!(m.confusion, [[1, 1], [1, 2]]);
        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_moves_predictions() {
        let probs  = [0.4, 0.45, 0.1];
        let labels = [true, true, false];
        assert_eq!(metrics_from_probabilities(&probs, &labels, 0.5).recall, 0.0);
        assert_eq!(metrics_from_probabilities(&probs, &labels, 0.3).recall, 1.0);
    }

    #[test]
    fn test_no_positive_predictions_gives_zero_precision() {
        let m = metrics_from_probabilities(&[0.1, 0.2], &[true, false], 0.5);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_auc_perfect_and_random() {
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &[false, false, true, true]), Some(1.0));
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &[false, true, false, true]), Some(0.5));
        assert_eq!(roc_auc(&[0.9, 0.8], &[true, true]), None);
    }

    #[test]
    fn test_auc_with_one_misordered_pair() {
        // pairs (pos, neg): (0.7,0.1) ok, (0.7,0.8) wrong, (0.9,0.1) ok, (0.9,0.8) ok
        let auc = roc_auc(&[0.1, 0.7, 0.8, 0.9], &[false, true, false, true]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }
}
