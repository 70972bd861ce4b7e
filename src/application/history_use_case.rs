// ============================================================
// Layer 2 — History Use Case
// ============================================================
// Two read-only views of the registry:
//   1. execute()        — history.jsonl, one summary per model
//   2. training_curve() — one model's per-epoch loss / accuracy,
//                         read back from its training_log.csv
//
// Neither view loads weights, so listing is cheap even with many
// registered models.

use anyhow::Result;
use std::path::PathBuf;

use crate::infra::metrics::EpochMetrics;
use crate::infra::registry::{HistoryEntry, ModelRegistry, VersionId};

pub struct HistoryUseCase {
    registry_dir: PathBuf,
}

impl HistoryUseCase {
    pub fn new(registry_dir: impl Into<PathBuf>) -> Self {
        Self { registry_dir: registry_dir.into() }
    }

    /// At most `limit` of the newest entries, still oldest first.
    pub fn execute(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        let mut entries = ModelRegistry::open(&self.registry_dir)?.history()?;
        if let Some(n) = limit {
            let skip = entries.len().saturating_sub(n);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    pub fn training_curve(&self, version: VersionId) -> Result<Vec<EpochMetrics>> {
        ModelRegistry::open(&self.registry_dir)?.training_log(version)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline_use_case::{tests::test_config, PipelineConfig, PipelineUseCase};

    #[test]
    fn test_history_grows_with_each_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap();
        let again = PipelineConfig { bronze_version: Some(1), ..cfg.clone() };
        PipelineUseCase::new(again).unwrap().execute().unwrap();

        let history = HistoryUseCase::new(&cfg.registry_dir);
        let all = history.execute(None).unwrap();
        assert_eq!(all.iter().map(|e| e.version).collect::<Vec<_>>(), vec![VersionId(1), VersionId(2)]);
        assert_eq!(all[1].lineage.bronze, 1);

        let newest = history.execute(Some(1)).unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].version, VersionId(2));

        let curve = history.training_curve(VersionId(2)).unwrap();
        assert_eq!(curve.len(), cfg.classifier.epochs);
        assert_eq!(curve.last().unwrap().epoch, cfg.classifier.epochs);
    }

    #[test]
    fn test_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HistoryUseCase::new(dir.path()).execute(Some(5)).unwrap().is_empty());
    }
}
