// ============================================================
// Layer 4 — Churn Batcher
// ============================================================
// Bridges the typed training matrix to Burn's data API:
//
//   FeatureMatrix<Train>
//       │  train_items()
//       ▼
//   InMemDataset<ChurnItem>      one item per training row
//       │  DataLoaderBuilder (batch_size, shuffle(seed))
//       ▼
//   ChurnBatcher::batch          Vec<ChurnItem> → ChurnBatch<B>
//
// How batching works here:
//   Input:  N items, each with F feature values
//   Output: features [N, F] (f32) and targets [N] (class index)
//
//   Feature values are flattened row-major, then reshaped:
//   [r1_f1, r1_f2, ..., r1_fF, r2_f1, ..., rN_fF] → [N, F]
//
// Why only FeatureMatrix<Train>?
//   The loader exists to feed the optimizer. Building items from
//   anything but the training partition would let test rows
//   reach gradient updates, so the constructor only accepts the
//   Train marker. Evaluation scores the test matrix in one pass
//   without a loader.
//
// Reference: Burn Book §4 (Batcher, DataLoader)

use burn::{
    data::{dataloader::batcher::Batcher, dataset::InMemDataset},
    prelude::*,
};

use crate::domain::dataset::Train;
use crate::domain::feature_matrix::FeatureMatrix;
use crate::ml::model::{features_tensor, targets_tensor};

// ─── ChurnItem ────────────────────────────────────────────────────────────────
/// One training row as the loader sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnItem {
    pub features: Vec<f32>,
    pub churn:    bool,
}

/// The training matrix as a Burn dataset, row order preserved.
pub fn train_items(matrix: &FeatureMatrix<Train>) -> InMemDataset<ChurnItem> {
    let items = matrix
        .rows()
        .iter()
        .zip(matrix.labels())
        .map(|(row, &churn)| ChurnItem {
            features: row.iter().map(|&x| x as f32).collect(),
            churn,
        })
        .collect();
    InMemDataset::new(items)
}

// ─── ChurnBatch ───────────────────────────────────────────────────────────────
/// A mini-batch ready for `ChurnClassifier::forward_loss`.
#[derive(Debug, Clone)]
pub struct ChurnBatch<B: Backend> {
    /// shape: [batch_size, n_features]
    pub features: Tensor<B, 2>,

    /// shape: [batch_size]; 1 = churn, 0 = stay
    pub targets: Tensor<B, 1, Int>,
}

// ─── ChurnBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct ChurnBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ChurnBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ChurnItem, ChurnBatch<B>> for ChurnBatcher<B> {
    fn batch(&self, items: Vec<ChurnItem>) -> ChurnBatch<B> {
        let n_rows     = items.len();
        let n_features = items.first().map_or(0, |item| item.features.len());

        let flat: Vec<f32> = items.iter().flat_map(|item| item.features.iter().copied()).collect();
        let labels: Vec<bool> = items.iter().map(|item| item.churn).collect();

        ChurnBatch {
            features: features_tensor::<B>(flat, n_rows, n_features, &self.device),
            targets:  targets_tensor::<B>(&labels, &self.device),
        }
    }
}
