// ============================================================
// Layer 4 — SMOTE Imbalance Corrector
// ============================================================
// Synthetic Minority Over-sampling TEchnique.
//
// For each synthetic row:
//   1. pick a minority row  a         (seeded ChaCha8Rng)
//   2. pick one of its k nearest minority neighbours  b
//   3. emit  a + gap · (b − a),  gap ~ U[0, 1)
//
// The number of synthetic rows is
//   ceil(ratio × majority) − minority
// so `ratio` is the minority/majority ratio reached afterwards
// (1.0 = perfectly balanced).
//
// `resample` takes FeatureMatrix<Train> only: the test partition
// keeps its real class distribution.
//
// Synthetic ids start with `smote-` and skip any id already taken,
// so a synthetic row can never shadow a real customer.
//
// Why interpolate instead of duplicating minority rows?
//   Copies give the classifier the same point many times and it
//   learns to fence those exact points. Interpolated rows fill the
//   region between real churners instead.
//
// Reference: Chawla et al. (2002), SMOTE, JAIR 16
//            rand_chacha crate documentation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

use crate::domain::dataset::{PartitionTag, Train};
use crate::domain::error::{PipelineError, PipelineResult};
use crate::domain::feature_matrix::FeatureMatrix;

/// Id prefix of oversampled rows.
pub const SYNTHETIC_PREFIX: &str = "smote-";

#[derive(Debug, Clone)]
pub struct Smote {
    ratio: f64,
    k:     usize,
    seed:  u64,
}

impl Smote {
    pub fn new(ratio: f64, k: usize, seed: u64) -> PipelineResult<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(PipelineError::Config(format!(
                "smote ratio must be in (0, 1], got {ratio}"
            )));
        }
        if k == 0 {
            return Err(PipelineError::Config("smote k must be at least 1".into()));
        }
        Ok(Self { ratio, k, seed })
    }

    /// Oversample the minority class of the training matrix.
    /// Original rows keep their position; synthetic rows are appended.
    pub fn resample(&self, train: FeatureMatrix<Train>) -> PipelineResult<FeatureMatrix<Train>> {
        for (row, id) in train.rows().iter().zip(train.ids()) {
            if let Some(x) = row.iter().find(|x| !x.is_finite()) {
                return Err(PipelineError::resampling(
                    PartitionTag::Train,
                    format!("row '{id}' holds non-finite feature {x}"),
                ));
            }
        }

        let (neg, pos) = train.class_counts();
        let (minority_label, minority, majority) = if pos <= neg {
            (true, pos, neg)
        } else {
            (false, neg, pos)
        };

        let target = (self.ratio * majority as f64).ceil() as usize;
        if minority >= target {
            tracing::debug!("SMOTE: {minority}/{majority} already meets ratio {}", self.ratio);
            return Ok(train);
        }
        if minority < 2 {
            return Err(PipelineError::resampling(
                PartitionTag::Train,
                format!("need at least 2 minority rows to interpolate, found {minority}"),
            ));
        }

        let members: Vec<&[f64]> = train
            .rows()
            .iter()
            .zip(train.labels())
            .filter(|(_, &l)| l == minority_label)
            .map(|(r, _)| r.as_slice())
            .collect();
        let k = self.k.min(members.len() - 1);
        let neighbours = nearest_neighbours(&members, k);

        let n_new   = target - minority;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut rows = Vec::with_capacity(n_new);
        for _ in 0..n_new {
            let a   = rng.gen_range(0..members.len());
            let b   = neighbours[a][rng.gen_range(0..k)];
            let gap: f64 = rng.gen();
            rows.push(
                members[a]
                    .iter()
                    .zip(members[b])
                    .map(|(x, y)| x + gap * (y - x))
                    .collect::<Vec<f64>>(),
            );
        }

        let ids    = synthetic_ids(&train, n_new);
        let labels = vec![minority_label; n_new];

        tracing::info!(
            "SMOTE: {} synthetic {} rows (minority {} → {}, majority {})",
            n_new,
            if minority_label { "churn" } else { "non-churn" },
            minority,
            target,
            majority,
        );

        train.extend(ids, rows, labels)
    }
}

/// `smote-1`, `smote-2`, ... skipping any id a real row already holds.
fn synthetic_ids(train: &FeatureMatrix<Train>, n_new: usize) -> Vec<String> {
    let taken: HashSet<&str> = train.ids().iter().map(String::as_str).collect();
    (1..)
        .map(|i| format!("{SYNTHETIC_PREFIX}{i}"))
        .filter(|id| !taken.contains(id.as_str()))
        .take(n_new)
        .collect()
}

/// For every member, the indices of its `k` closest other members
/// (squared Euclidean distance, ties by index).
fn nearest_neighbours(members: &[&[f64]], k: usize) -> Vec<Vec<usize>> {
    members
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let mut dist: Vec<(f64, usize)> = members
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, b)| {
                    let d = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>();
                    (d, j)
                })
                .collect();
            dist.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
            dist.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `pos` churners around (5, 5) and `neg` stayers around (0, 0).
    fn imbalanced(neg: usize, pos: usize) -> FeatureMatrix<Train> {
        let mut ids    = Vec::new();
        let mut rows   = Vec::new();
        let mut labels = Vec::new();
        for i in 0..neg {
            ids.push(format!("n{i}"));
            rows.push(vec![(i % 7) as f64 * 0.1, (i % 5) as f64 * 0.1]);
            labels.push(false);
        }
        for i in 0..pos {
            ids.push(format!("p{i}"));
            rows.push(vec![5.0 + (i % 3) as f64 * 0.2, 5.0 + (i % 4) as f64 * 0.2]);
            labels.push(true);
        }
        FeatureMatrix::new(vec!["x".into(), "y".into()], ids, rows, labels).unwrap()
    }

    #[test]
    fn test_reaches_target_ratio() {
        let out = Smote::new(1.0, 5, 42).unwrap().resample(imbalanced(400, 100)).unwrap();
        let (neg, pos) = out.class_counts();
        assert_eq!(neg, 400);
        assert!((pos as f64 / neg as f64 - 1.0).abs() < 0.01);

        let out = Smote::new(0.5, 5, 42).unwrap().resample(imbalanced(400, 100)).unwrap();
        let (neg, pos) = out.class_counts();
        assert!((pos as f64 / neg as f64 - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_original_rows_kept_in_place() {
        let input = imbalanced(50, 10);
        let out   = Smote::new(1.0, 3, 1).unwrap().resample(input.clone()).unwrap();
        assert_eq!(&out.rows()[..input.n_rows()], input.rows());
        assert_eq!(&out.ids()[..input.n_rows()], input.ids());
        assert!(out.ids()[input.n_rows()..].iter().all(|id| id.starts_with("smote-")));
    }

    #[test]
    fn test_synthetic_rows_stay_inside_minority_hull() {
        let out = Smote::new(1.0, 5, 3).unwrap().resample(imbalanced(60, 12)).unwrap();
        for row in &out.rows()[72..] {
            assert!(row[0] >= 5.0 && row[0] <= 5.4 + 1e-12);
            assert!(row[1] >= 5.0 && row[1] <= 5.6 + 1e-12);
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let a = Smote::new(1.0, 5, 9).unwrap().resample(imbalanced(80, 20)).unwrap();
        let b = Smote::new(1.0, 5, 9).unwrap().resample(imbalanced(80, 20)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_balanced_input_unchanged() {
        let input = imbalanced(30, 30);
        let out   = Smote::new(1.0, 5, 1).unwrap().resample(input.clone()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_single_minority_row_is_resampling_error() {
        let err = Smote::new(1.0, 5, 1).unwrap().resample(imbalanced(30, 1)).unwrap_err();
        assert!(matches!(err, PipelineError::Resampling { partition: PartitionTag::Train, .. }));
    }

    #[test]
    fn test_non_finite_feature_is_resampling_error() {
        let m = FeatureMatrix::<Train>::new(
            vec!["x".into()],
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![1.0], vec![f64::NAN], vec![2.0]],
            vec![false, true, true],
        )
        .unwrap();
        let err = Smote::new(1.0, 5, 1).unwrap().resample(m).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_synthetic_ids_never_collide_with_real_ids() {
        let mut ids: Vec<String> = (0..20).map(|i| format!("n{i}")).collect();
        ids.extend(["smote-1", "smote-3", "p2", "p3"].map(String::from));
        let rows   = (0..24).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let labels = (0..24).map(|i| i >= 20).collect();
        let input  = FeatureMatrix::<Train>::new(vec!["x".into(), "y".into()], ids, rows, labels).unwrap();

        let out = Smote::new(1.0, 2, 4).unwrap().resample(input).unwrap();
        let unique: HashSet<&String> = out.ids().iter().collect();
        assert_eq!(unique.len(), out.n_rows());
        assert_eq!(&out.ids()[24..27], &["smote-2", "smote-4", "smote-5"].map(String::from));
    }

    #[test]
    fn test_rejects_ratio_outside_range() {
        assert!(Smote::new(0.0, 5, 1).is_err());
        assert!(Smote::new(1.5, 5, 1).is_err());
        assert!(Smote::new(1.0, 0, 1).is_err());
    }
}
