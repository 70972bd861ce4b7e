// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Mini-batch Adam on the balanced training matrix.
//
// Per epoch:
//   1. the DataLoader reshuffles the training items; its RNG is
//      seeded from cfg.seed, so the batch order is reproducible
//   2. for each batch: forward → cross-entropy → backward → step
//   3. model.valid() scores the whole training matrix once to
//      record accuracy next to the mean batch loss
//
// Burn notes:
//   - training runs on TrainBackend (Autodiff<NdArray>)
//   - model.valid() drops autodiff → ChurnClassifier<InferBackend>
//   - num_workers(1) keeps batches in loader order
//
// Why zero-initialized logistic regression?
//   The selected features are already scaled by the snapshot, so a
//   linear model converges in a few epochs, and zero weights make
//   two runs with the same seed produce identical parameters.
//
// Only FeatureMatrix<Train> is accepted.
//
// Reference: Burn Book §5 (Training), Kingma & Ba (2015) Adam

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::{train_items, ChurnBatcher};
use crate::domain::dataset::{PartitionTag, Train};
use crate::domain::error::PipelineError;
use crate::domain::feature_matrix::FeatureMatrix;
use crate::infra::metrics::EpochMetrics;
use crate::ml::model::{
    features_tensor, ChurnClassifier, ChurnClassifierConfig, InferBackend, TrainBackend,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Full passes over the balanced training matrix
    pub epochs:        usize,
    /// Adam step size
    pub learning_rate: f64,
    /// Rows per mini-batch; the last batch of an epoch may be shorter
    pub batch_size:    usize,
    /// Seeds the DataLoader shuffle, so batch order is reproducible
    pub seed:          u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            epochs:        30,
            learning_rate: 0.05,
            batch_size:    64,
            seed:          42,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.epochs == 0 {
            return Err(PipelineError::Config("epochs must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(PipelineError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// A fitted classifier plus its learning curve.
pub struct TrainedClassifier {
    pub model:     ChurnClassifier<InferBackend>,
    pub model_cfg: ChurnClassifierConfig,
    pub history:   Vec<EpochMetrics>,
}

pub fn train_classifier(
    cfg:   &ClassifierConfig,
    train: &FeatureMatrix<Train>,
) -> Result<TrainedClassifier> {
    cfg.validate()?;
    if train.n_rows() == 0 {
        return Err(PipelineError::data_quality(
            PartitionTag::Train,
            "*",
            "training matrix is empty",
        )
        .into());
    }

    let device     = Default::default();
    let n_features = train.n_features();
    let model_cfg  = ChurnClassifierConfig::new(n_features);
    let mut model: ChurnClassifier<TrainBackend> = model_cfg.init(&device);
    let mut optim  = AdamConfig::new().with_epsilon(1e-8).init();

    // ── Training data loader ──────────────────────────────────────────────────
    let loader = DataLoaderBuilder::new(ChurnBatcher::<TrainBackend>::new(device))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(train_items(train));

    tracing::info!(
        "Training logistic regression: {} rows × {} features, {} epochs, lr={}, batch={}",
        train.n_rows(),
        n_features,
        cfg.epochs,
        cfg.learning_rate,
        cfg.batch_size,
    );

    let mut history = Vec::with_capacity(cfg.epochs);

    for epoch in 1..=cfg.epochs {
        let mut loss_sum = 0.0f64;
        for batch in loader.iter() {
            let [rows, _] = batch.features.dims();
            let (loss, _) = model.forward_loss(batch.features, batch.targets);

            // Weighted by batch size so a short last batch counts less.
            loss_sum += loss.clone().into_scalar().elem::<f64>() * rows as f64;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }

        let train_loss     = loss_sum / train.n_rows() as f64;
        let train_accuracy = accuracy(&model.valid(), train)?;
        tracing::debug!(
            "Epoch {:>3}/{} | train_loss={:.4} | train_acc={:.1}%",
            epoch,
            cfg.epochs,
            train_loss,
            train_accuracy * 100.0,
        );
        history.push(EpochMetrics::new(epoch, train_loss, train_accuracy));
    }

    if let Some(last) = history.last() {
        tracing::info!(
            "Training complete: loss={:.4}, train accuracy={:.1}%",
            last.train_loss,
            last.train_accuracy * 100.0
        );
    }

    Ok(TrainedClassifier { model: model.valid(), model_cfg, history })
}

/// Churn probability per row of `flat` (row-major, `n_features` wide).
pub fn predict_proba(
    model:      &ChurnClassifier<InferBackend>,
    flat:       Vec<f32>,
    n_rows:     usize,
    n_features: usize,
) -> Result<Vec<f64>> {
    if n_rows == 0 {
        return Ok(Vec::new());
    }
    let device = Default::default();
    let x = features_tensor::<InferBackend>(flat, n_rows, n_features, &device);
    let probs = model
        .probabilities(x)
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read probabilities back from tensor: {e:?}"))?;
    Ok(probs.into_iter().map(f64::from).collect())
}

fn accuracy(model: &ChurnClassifier<InferBackend>, train: &FeatureMatrix<Train>) -> Result<f64> {
    let probs = predict_proba(model, train.to_f32_row_major(), train.n_rows(), train.n_features())?;
    let correct = probs
        .iter()
        .zip(train.labels())
        .filter(|(&p, &l)| (p >= 0.5) == l)
        .count();
    Ok(correct as f64 / train.n_rows() as f64)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    /// Churn iff x0 + x1 > 0, with x in a small grid.
    fn separable() -> FeatureMatrix<Train> {
        let mut rows   = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            for j in 0..10 {
                let x0 = (i as f64 - 9.5) / 5.0;
                let x1 = (j as f64 - 4.5) / 5.0;
                rows.push(vec![x0, x1]);
                labels.push(x0 + x1 > 0.0);
            }
        }
        let ids = (0..rows.len()).map(|i| format!("r{i}")).collect();
        FeatureMatrix::new(vec!["x0".into(), "x1".into()], ids, rows, labels).unwrap()
    }

    fn quick() -> ClassifierConfig {
        ClassifierConfig { epochs: 15, learning_rate: 0.1, batch_size: 32, seed: 7 }
    }

    #[test]
    fn test_learns_separable_data() {
        let trained = train_classifier(&quick(), &separable()).unwrap();
        assert_eq!(trained.history.len(), 15);
        let last = trained.history.last().unwrap();
        assert!(last.train_accuracy > 0.9, "accuracy {}", last.train_accuracy);
        assert!(last.train_loss < trained.history[0].train_loss);
    }

    #[test]
    fn test_same_seed_same_predictions() {
        let m = separable();
        let a = train_classifier(&quick(), &m).unwrap();
        let b = train_classifier(&quick(), &m).unwrap();
        let pa = predict_proba(&a.model, m.to_f32_row_major(), m.n_rows(), 2).unwrap();
        let pb = predict_proba(&b.model, m.to_f32_row_major(), m.n_rows(), 2).unwrap();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_rejects_zero_epochs() {
        let cfg = ClassifierConfig { epochs: 0, ..quick() };
        assert!(train_classifier(&cfg, &separable()).is_err());
    }

    #[test]
    fn test_empty_input_yields_no_predictions() {
        let trained = train_classifier(&quick(), &separable()).unwrap();
        assert!(predict_proba(&trained.model, vec![], 0, 2).unwrap().is_empty());
    }
}
