// ============================================================
// Layer 3 — Feature Vectors
// ============================================================
// The numeric-only projection of a Dataset: one f64 per named
// feature per row, plus the churn label and the row id.
// Carries the same partition marker as the Dataset it came from.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use crate::domain::dataset::Partition;
use crate::domain::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct FeatureMatrix<P: Partition> {
    names:  Vec<String>,
    ids:    Vec<String>,
    rows:   Vec<Vec<f64>>,
    labels: Vec<bool>,
    #[serde(skip)]
    partition: PhantomData<P>,
}

impl<P: Partition> FeatureMatrix<P> {
    pub(crate) fn new(
        names:  Vec<String>,
        ids:    Vec<String>,
        rows:   Vec<Vec<f64>>,
        labels: Vec<bool>,
    ) -> PipelineResult<Self> {
        if ids.len() != rows.len() || labels.len() != rows.len() {
            return Err(PipelineError::schema(
                P::TAG,
                format!(
                    "feature matrix has {} rows but {} ids and {} labels",
                    rows.len(),
                    ids.len(),
                    labels.len()
                ),
            ));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != names.len()) {
            return Err(PipelineError::schema(
                P::TAG,
                format!(
                    "feature row '{}' has {} values, expected {}",
                    ids[i],
                    row.len(),
                    names.len()
                ),
            ));
        }
        Ok(Self { names, ids, rows, labels, partition: PhantomData })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    /// (non-churn count, churn count)
    pub fn class_counts(&self) -> (usize, usize) {
        let pos = self.labels.iter().filter(|&&l| l).count();
        (self.labels.len() - pos, pos)
    }

    /// Minority / majority ratio; 0.0 when either class is absent.
    pub fn class_ratio(&self) -> f64 {
        let (neg, pos) = self.class_counts();
        let (lo, hi) = if neg < pos { (neg, pos) } else { (pos, neg) };
        if hi == 0 { 0.0 } else { lo as f64 / hi as f64 }
    }

    /// Feature values flattened row-major as f32, the layout the model expects.
    pub fn to_f32_row_major(&self) -> Vec<f32> {
        self.rows.iter().flatten().map(|&x| x as f32).collect()
    }

    /// Project onto `names` in that exact order.
    pub fn select(&self, names: &[String]) -> PipelineResult<Self> {
        let indices = names
            .iter()
            .map(|n| {
                self.names.iter().position(|m| m == n).ok_or_else(|| {
                    PipelineError::schema(P::TAG, format!("feature '{n}' is absent"))
                })
            })
            .collect::<PipelineResult<Vec<usize>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|r| indices.iter().map(|&i| r[i]).collect())
            .collect();

        Self::new(names.to_vec(), self.ids.clone(), rows, self.labels.clone())
    }

    /// Schema-consistency check: feature names and order must match `reference`.
    pub fn ensure_same_features<Q: Partition>(&self, reference: &FeatureMatrix<Q>) -> PipelineResult<()> {
        if self.names == reference.names {
            Ok(())
        } else {
            Err(PipelineError::schema(
                P::TAG,
                format!(
                    "feature names diverge from {} partition ({} vs {} features)",
                    Q::TAG,
                    self.names.len(),
                    reference.names.len()
                ),
            ))
        }
    }

    /// Append rows (used for synthetic oversampling). Widths are re-checked.
    pub(crate) fn extend(
        self,
        ids:    Vec<String>,
        rows:   Vec<Vec<f64>>,
        labels: Vec<bool>,
    ) -> PipelineResult<Self> {
        let mut all_ids    = self.ids;
        let mut all_rows   = self.rows;
        let mut all_labels = self.labels;
        all_ids.extend(ids);
        all_rows.extend(rows);
        all_labels.extend(labels);
        Self::new(self.names, all_ids, all_rows, all_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::{Test, Train};

    fn matrix() -> FeatureMatrix<Train> {
        FeatureMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["r1".into(), "r2".into()],
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            vec![true, false],
        )
        .unwrap()
    }

    #[test]
    fn test_select_reorders_columns() {
        let m = matrix().select(&["c".into(), "a".into()]).unwrap();
        assert_eq!(m.names(), &["c".to_string(), "a".to_string()]);
        assert_eq!(m.rows()[1], vec![6.0, 4.0]);
    }

    #[test]
    fn test_select_missing_feature_is_schema_error() {
        let err = matrix().select(&["z".into()]).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let err = FeatureMatrix::<Test>::new(
            vec!["a".into()],
            vec!["r1".into()],
            vec![vec![1.0, 2.0]],
            vec![false],
        )
        .unwrap_err();
        assert!(err.to_string().contains("test partition"));
    }

    #[test]
    fn test_class_counts_and_ratio() {
        let m = matrix();
        assert_eq!(m.class_counts(), (1, 1));
        assert!((m.class_ratio() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ensure_same_features() {
        let train = matrix();
        let test: FeatureMatrix<Test> = FeatureMatrix::new(
            vec!["a".into(), "b".into()],
            vec!["t".into()],
            vec![vec![0.0, 0.0]],
            vec![false],
        )
        .unwrap();
        assert!(test.ensure_same_features(&train).is_err());
    }
}
