// ============================================================
// Layer 5 — Importance-Based Feature Selection
// ============================================================
// Fit on the resampled TRAINING matrix only:
//   1. grow a RandomForest
//   2. keep features whose normalized importance >= threshold
//   3. order them by descending importance
//   4. always keep at least the single most important feature
//
// The resulting FeatureSelection is a plain list of names, applied
// verbatim to the test matrix and later to scoring input.
//
// Reference: Rust Book §13 (Iterators and Closures)

use serde::{Deserialize, Serialize};

use crate::domain::dataset::{Partition, Train};
use crate::domain::error::{PipelineError, PipelineResult};
use crate::domain::feature_matrix::FeatureMatrix;
use crate::ml::forest::{ForestConfig, RandomForest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Features below this normalized importance are dropped
    pub importance_threshold: f64,
    pub forest:               ForestConfig,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 0.01,
            forest:               ForestConfig::default(),
        }
    }
}

/// The fitted selection: which features survive, in which order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelection {
    pub selected:   Vec<String>,
    /// Importance of every candidate feature, most important first.
    pub importance: Vec<(String, f64)>,
    pub threshold:  f64,
}

pub struct FeatureSelector {
    config: SelectionConfig,
}

impl FeatureSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn fit(&self, train: &FeatureMatrix<Train>) -> PipelineResult<FeatureSelection> {
        let threshold = self.config.importance_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(PipelineError::Config(format!(
                "importance_threshold must be in [0, 1), got {threshold}"
            )));
        }

        let forest = RandomForest::fit(self.config.forest.clone(), train)?;
        let ranked = forest.ranked_importances();

        let mut selected: Vec<String> = ranked
            .iter()
            .filter(|(_, imp)| *imp >= threshold)
            .map(|(name, _)| name.clone())
            .collect();
        if selected.is_empty() {
            if let Some((name, _)) = ranked.first() {
                selected.push(name.clone());
            }
        }

        tracing::info!(
            "Feature selection kept {}/{} features (threshold {})",
            selected.len(),
            ranked.len(),
            threshold
        );
        for (name, imp) in ranked.iter().take(10) {
            tracing::debug!("  {name:<40} {imp:.4}");
        }

        Ok(FeatureSelection { selected, importance: ranked, threshold })
    }
}

impl FeatureSelection {
    /// Project any partition onto the selected features, in selection order.
    pub fn apply<P: Partition>(&self, matrix: &FeatureMatrix<P>) -> PipelineResult<FeatureMatrix<P>> {
        matrix.select(&self.selected)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::Test;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn matrix<P: Partition>(n: usize, seed: u64) -> FeatureMatrix<P> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut rows   = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..n {
            let a: f64 = rng.gen();
            let b: f64 = rng.gen();
            rows.push(vec![b, 0.0, a]);
            labels.push(a > 0.4);
        }
        FeatureMatrix::new(
            vec!["noise".into(), "zero".into(), "signal".into()],
            (0..n).map(|i| format!("r{i}")).collect(),
            rows,
            labels,
        )
        .unwrap()
    }

    fn selector(threshold: f64) -> FeatureSelector {
        FeatureSelector::new(SelectionConfig {
            importance_threshold: threshold,
            forest: ForestConfig { n_trees: 15, ..Default::default() },
        })
    }

    #[test]
    fn test_selection_orders_by_importance_and_drops_useless() {
        let sel = selector(0.01).fit(&matrix::<Train>(300, 1)).unwrap();
        assert_eq!(sel.selected[0], "signal");
        assert!(!sel.selected.contains(&"zero".to_string()));
        assert_eq!(sel.importance.len(), 3);
    }

    #[test]
    fn test_same_selection_applied_to_test() {
        let train = matrix::<Train>(300, 1);
        let test  = matrix::<Test>(50, 2);
        let sel   = selector(0.01).fit(&train).unwrap();

        let train_sel = sel.apply(&train).unwrap();
        let test_sel  = sel.apply(&test).unwrap();
        assert_eq!(train_sel.names(), test_sel.names());
        assert_eq!(test_sel.n_rows(), 50);
        assert!(test_sel.ensure_same_features(&train_sel).is_ok());
    }

    #[test]
    fn test_keeps_at_least_one_feature() {
        let sel = selector(0.999).fit(&matrix::<Train>(200, 3)).unwrap();
        assert_eq!(sel.selected, vec!["signal".to_string()]);
    }

    #[test]
    fn test_missing_feature_in_test_is_schema_error() {
        let sel = FeatureSelection {
            selected:   vec!["tenure".into()],
            importance: vec![("tenure".into(), 1.0)],
            threshold:  0.0,
        };
        let err = sel.apply(&matrix::<Test>(5, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
        assert!(err.to_string().contains("test partition"));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(selector(1.5).fit(&matrix::<Train>(20, 1)).is_err());
    }
}
