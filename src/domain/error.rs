// ============================================================
// Layer 3 — Pipeline Error Taxonomy
// ============================================================
// Every check a stage performs fails with one of these variants.
// Each variant names the partition it was raised on so the CLI
// can report "which check failed, and where".
//
//   Schema      — missing / mismatched columns between partitions
//   Leakage     — a train/test boundary was crossed
//   DataQuality — a value could not be parsed or became non-finite
//   Resampling  — the imbalance corrector received unusable input
//   Config      — an option is outside its valid range
//
// Leakage is mostly prevented by the type system (see dataset.rs);
// the variant covers the runtime checks that remain, such as a
// customer id landing in both partitions.
//
// Reference: thiserror crate documentation

use thiserror::Error;

use crate::domain::dataset::PartitionTag;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("schema check failed on {partition} partition: {detail}")]
    Schema { partition: PartitionTag, detail: String },

    #[error("leakage check failed on {partition} partition: {detail}")]
    Leakage { partition: PartitionTag, detail: String },

    #[error("data quality check failed on {partition} partition, column '{column}': {detail}")]
    DataQuality {
        partition: PartitionTag,
        column:    String,
        detail:    String,
    },

    #[error("resampling rejected {partition} partition: {detail}")]
    Resampling { partition: PartitionTag, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn schema(partition: PartitionTag, detail: impl Into<String>) -> Self {
        Self::Schema { partition, detail: detail.into() }
    }

    pub fn leakage(partition: PartitionTag, detail: impl Into<String>) -> Self {
        Self::Leakage { partition, detail: detail.into() }
    }

    pub fn data_quality(
        partition: PartitionTag,
        column:    impl Into<String>,
        detail:    impl Into<String>,
    ) -> Self {
        Self::DataQuality {
            partition,
            column: column.into(),
            detail: detail.into(),
        }
    }

    pub fn resampling(partition: PartitionTag, detail: impl Into<String>) -> Self {
        Self::Resampling { partition, detail: detail.into() }
    }

    /// The partition the failing check ran on, if any.
    pub fn partition(&self) -> Option<PartitionTag> {
        match self {
            Self::Schema { partition, .. }
            | Self::Leakage { partition, .. }
            | Self::DataQuality { partition, .. }
            | Self::Resampling { partition, .. } => Some(*partition),
            Self::Config(_) => None,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
