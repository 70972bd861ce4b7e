// ============================================================
// Layer 5 — ML / Model Layer
// ============================================================
// Everything that learns from the feature matrices lives here.
// The burn framework is imported by model.rs and trainer.rs only.
//
// What's in this layer:
//
//   forest.rs     — Classification random forest (rayon, seeded)
//                   used to rank features by Gini importance
//
//   selection.rs  — Importance-threshold feature selection,
//                   fit on FeatureMatrix<Train>, applied to any
//
//   model.rs      — Softmax logistic regression in burn
//                   (Linear n → 2, zero-initialized)
//
//   trainer.rs    — Mini-batch Adam loop with per-epoch loss
//                   and accuracy
//
//   evaluator.rs  — One-shot scoring on FeatureMatrix<Test>:
//                   accuracy, precision, recall, F1, ROC AUC,
//                   confusion matrix
//
//   inferencer.rs — Replays snapshot + selection + model on raw
//                   customer rows

/// Random forest for feature importance
pub mod forest;

/// Train-fitted feature selection
pub mod selection;

/// Logistic regression churn classifier
pub mod model;

/// Training loop
pub mod trainer;

/// Test-partition metrics
pub mod evaluator;

/// Scoring raw records with a registered model
pub mod inferencer;
