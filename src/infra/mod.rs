// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the file system on behalf of the
// pipeline:
//
//   store.rs     — Versioned Bronze / Silver / Gold layers.
//                  Each version is staged in a hidden directory,
//                  fsynced, then renamed into place, so readers
//                  never see a half-written layer.
//
//   registry.rs  — Model registry. Weights (burn's
//                  NamedMpkFileRecorder, full precision), a JSON
//                  manifest with params / metrics / snapshot /
//                  selection / lineage, and an append-only
//                  history.jsonl.
//
//   metrics.rs   — Per-epoch training metrics as CSV, stored next
//                  to each registered model.

/// Layered data store
pub mod store;

/// Model registry
pub mod registry;

/// Training metrics CSV logger
pub mod metrics;
