// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records the classifier's learning curve to a CSV file, one
// row per epoch, next to the registered model.
//
// Metrics recorded per epoch:
//   - epoch:          the epoch number (1, 2, 3, ...)
//   - train_loss:     mean cross-entropy over the epoch's batches
//   - train_accuracy: accuracy on the balanced training matrix
//                     after the epoch (threshold 0.5)
//
// Output file: registry/v<NNNN>/training_log.csv
//
// Example CSV output:
//   epoch,train_loss,train_accuracy
//   1,0.612300,0.701000
//   2,0.548100,0.739000
//   ...
//
// Test metrics are NOT logged per epoch: the test partition is
// scored exactly once, after training, by the evaluator.
//
// Reference: csv crate documentation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Mean cross-entropy loss over the epoch, weighted by batch size.
    /// Zero-initialized weights start at ln 2 ≈ 0.693.
    pub train_loss: f64,

    /// Fraction of training rows classified correctly
    pub train_accuracy: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, train_accuracy: f64) -> Self {
        Self { epoch, train_loss, train_accuracy }
    }
}

/// Writes epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create `training_log.csv` inside `dir` and write the header.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join(TRAINING_LOG_FILE);
        let mut f = fs::File::create(&csv_path)
            .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
        writeln!(f, "epoch,train_loss,train_accuracy")?;
        tracing::debug!("Created metrics CSV: '{}'", csv_path.display());

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{:.6},{:.6}", m.epoch, m.train_loss, m.train_accuracy)?;
        Ok(())
    }

    /// Append every epoch and fsync the file.
    pub fn log_all(&self, history: &[EpochMetrics]) -> Result<()> {
        for m in history {
            self.log(m)?;
        }
        fs::File::open(&self.csv_path)?.sync_all()?;
        tracing::debug!("Logged {} epochs to '{}'", history.len(), self.csv_path.display());
        Ok(())
    }

}

/// File name of the log inside a registry version.
pub const TRAINING_LOG_FILE: &str = "training_log.csv";

/// Read a training log back, for `history --model-version`.
pub fn read_training_log(path: &Path) -> Result<Vec<EpochMetrics>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Cannot read training log '{}'", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<EpochMetrics>, csv::Error>>()
        .with_context(|| format!("Malformed training log '{}'", path.display()))
}
