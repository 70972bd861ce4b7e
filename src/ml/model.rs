// ============================================================
// Layer 5 — Churn Classifier (Burn)
// ============================================================
// Softmax logistic regression:
//
//   features [batch, n_features]
//       │
//       ▼
//   Linear(n_features → 2)      weights and bias start at zero
//       │
//       ▼
//   logits [batch, 2]           column 1 = churn
//
// Zero initialization makes training a pure function of the data,
// the batch order and the optimizer, so the same seed reproduces
// the same weights on the CPU backend.
//
// Reference: Burn Book §3 (Building Blocks: Module, Linear)

use burn::{
    nn::{loss::CrossEntropyLossConfig, Initializer, Linear, LinearConfig},
    prelude::*,
    tensor::{activation::softmax, TensorData},
};

/// Backend used for inference and evaluation.
pub type InferBackend = burn::backend::NdArray;

/// Backend used for training (adds reverse-mode autodiff).
pub type TrainBackend = burn::backend::Autodiff<InferBackend>;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct ChurnClassifierConfig {
    pub n_features: usize,
}

impl ChurnClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ChurnClassifier<B> {
        let linear = LinearConfig::new(self.n_features, 2)
            .with_initializer(Initializer::Zeros)
            .init(device);
        ChurnClassifier { linear }
    }
}

#[derive(Module, Debug)]
pub struct ChurnClassifier<B: Backend> {
    pub linear: Linear<B>,
}

impl<B: Backend> ChurnClassifier<B> {
    /// features: [batch, n_features] → logits: [batch, 2]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(features)
    }

    /// Mean cross-entropy over the batch, plus the logits.
    pub fn forward_loss(
        &self,
        features: Tensor<B, 2>,
        targets:  Tensor<B, 1, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets);
        (loss, logits)
    }

    /// P(churn) per row: softmax over the two logits, column 1.
    pub fn probabilities(&self, features: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, _] = features.dims();
        softmax(self.forward(features), 1)
            .slice([0..batch, 1..2])
            .reshape([batch])
    }
}

/// Row-major f32 features → tensor on `device`.
pub fn features_tensor<B: Backend>(
    flat:       Vec<f32>,
    n_rows:     usize,
    n_features: usize,
    device:     &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(flat, [n_rows, n_features]), device)
}

/// Churn labels → class indices (1 = churn).
pub fn targets_tensor<B: Backend>(labels: &[bool], device: &B::Device) -> Tensor<B, 1, Int> {
    let classes: Vec<i64> = labels.iter().map(|&l| i64::from(l)).collect();
    let n = classes.len();
    Tensor::from_data(TensorData::new(classes, [n]), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_init_predicts_one_half() {
        let device = Default::default();
        let model: ChurnClassifier<InferBackend> = ChurnClassifierConfig::new(3).init(&device);
        let x = features_tensor::<InferBackend>(vec![1.0, -2.0, 0.5, 0.0, 0.0, 3.0], 2, 3, &device);
        let p = model.probabilities(x).into_data().to_vec::<f32>().unwrap();
        assert_eq!(p.len(), 2);
        assert!(p.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: ChurnClassifier<InferBackend> = ChurnClassifierConfig::new(4).init(&device);
        let x = features_tensor::<InferBackend>(vec![0.0; 20], 5, 4, &device);
        assert_eq!(model.forward(x).dims(), [5, 2]);
    }

    #[test]
    fn test_zero_init_loss_is_ln2() {
        let device = Default::default();
        let model: ChurnClassifier<InferBackend> = ChurnClassifierConfig::new(2).init(&device);
        let x = features_tensor::<InferBackend>(vec![1.0, 2.0, 3.0, 4.0], 2, 2, &device);
        let y = targets_tensor::<InferBackend>(&[true, false], &device);
        let (loss, _) = model.forward_loss(x, y);
        let loss: f64 = loss.into_scalar().elem();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }
}
