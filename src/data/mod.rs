// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from raw customer records
// all the way to balanced, model-ready feature matrices.
//
// The pipeline flows in this order:
//
//   SyntheticGenerator + CsvRecordSource
//       │
//       ▼
//   combine_sources      → Dataset<Unpartitioned>      (Bronze)
//       │
//       ▼
//   stratified_split     → Dataset<Train>, Dataset<Test>
//       │
//       ▼
//   derive_domain_features (pure, per row, both sides)
//       │
//       ▼
//   Transformer::fit     → StatisticSnapshot (train only)
//   snapshot.apply       → cleaned datasets            (Silver)
//   snapshot.vectorize   → FeatureMatrix<Train/Test>
//       │
//       ▼
//   Smote::resample      → balanced FeatureMatrix<Train>
//       │
//       ▼
//   train_items + ChurnBatcher → Burn DataLoader batches
//
// Every step after the split takes the two partitions as
// separate typed values. Nothing that fits a statistic can
// be handed the Test marker.

/// Seeded synthetic Telco-style customer records
pub mod generator;

/// Telco CSV import and source combination
pub mod loader;

/// Stratified train/test split
pub mod splitter;

/// Row-wise domain features (charge ratio, tenure group, ...)
pub mod features;

/// Train-fitted cleaning, scaling and one-hot encoding
pub mod preprocessor;

/// SMOTE oversampling of the training matrix
pub mod resampler;

/// Burn Batcher / Dataset adapter for the training matrix
pub mod batcher;
