// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// user-facing goal per use case.
//
// Rules for this layer:
//   - No statistics or model math here (Layers 4 and 5)
//   - No printing here (that's Layer 1)
//   - No direct file formats here (that's Layer 6)
//   - Only workflow coordination and stage ordering
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// The full Bronze → Silver → Gold → model → registry run
pub mod pipeline_use_case;

/// Scoring raw records with a registered model
pub mod predict_use_case;

/// Registry history and per-model training curves
pub mod history_use_case;
