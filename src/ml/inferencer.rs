// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Scores raw customer rows with a registered model. The exact
// transformations the model was trained behind are replayed from
// the stored artifacts, never re-fitted:
//
//   raw Dataset<P>
//     → derive_domain_features
//     → snapshot.apply        (train medians / modes / fences)
//     → snapshot.vectorize    (train mean / std / vocabularies)
//     → selection.apply       (train-fitted feature list)
//     → classifier            (P(churn))

use anyhow::{Context, Result};

use crate::data::features::derive_domain_features;
use crate::data::preprocessor::StatisticSnapshot;
use crate::domain::dataset::{Dataset, Partition};
use crate::ml::model::{ChurnClassifier, InferBackend};
use crate::ml::selection::FeatureSelection;
use crate::ml::trainer::predict_proba;

pub struct Inferencer {
    model:     ChurnClassifier<InferBackend>,
    snapshot:  StatisticSnapshot,
    selection: FeatureSelection,
}

/// One scored customer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnScore {
    pub customer_id: String,
    pub probability: f64,
}

impl Inferencer {
    pub fn new(
        model:     ChurnClassifier<InferBackend>,
        snapshot:  StatisticSnapshot,
        selection: FeatureSelection,
    ) -> Result<Self> {
        snapshot.ensure_train_provenance()?;
        Ok(Self { model, snapshot, selection })
    }

    pub fn score<P: Partition>(&self, raw: Dataset<P>) -> Result<Vec<ChurnScore>> {
        let derived  = derive_domain_features(raw).context("Cannot derive domain features")?;
        let cleaned  = self.snapshot.apply(&derived).context("Cannot clean scoring input")?;
        let matrix   = self.snapshot.vectorize(&cleaned).context("Cannot vectorize scoring input")?;
        let selected = self.selection.apply(&matrix)?;

        let probs = predict_proba(
            &self.model,
            selected.to_f32_row_major(),
            selected.n_rows(),
            selected.n_features(),
        )?;

        Ok(selected
            .ids()
            .iter()
            .zip(probs)
            .map(|(id, probability)| ChurnScore { customer_id: id.clone(), probability })
            .collect())
    }
}
