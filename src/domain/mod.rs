// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing what the pipeline works on:
// records, schemas, partition-tagged datasets, feature vectors
// and the error taxonomy. No file I/O and no burn types here.

// One telecom customer and the raw column names
pub mod record;

// Column kinds, cell values and schema checks
pub mod schema;

// Partition markers and the Dataset<P> container
pub mod dataset;

// Numeric feature vectors with the same partition markers
pub mod feature_matrix;

// Schema / Leakage / DataQuality / Resampling errors
pub mod error;

// Abstractions implemented by the data layer
pub mod traits;
