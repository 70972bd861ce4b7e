// ============================================================
// Layer 6 — Model Registry
// ============================================================
// Records every trained model with everything needed to score
// raw customers again later, and to reproduce the run.
//
//   registry/
//     v0001/
//       model.mpk           ← classifier weights (full precision)
//       manifest.json       ← params, metrics, snapshot, selection,
//                             lineage (bronze/silver/gold versions)
//       training_log.csv    ← per-epoch loss / accuracy
//     v0002/ ...
//     history.jsonl         ← one summary line per registration
//
// Rules:
//   - version ids increase monotonically from 1
//   - a version directory is staged and renamed into place, and
//     an existing version is never overwritten
//   - history.jsonl is append-only
//
// Weights are written with NamedMpkFileRecorder at
// FullPrecisionSettings, so a loaded model reproduces the
// registered model's predictions exactly.
//
// If the history append fails after the rename, the new version
// directory is removed again and the error says the registration
// was rolled back.
//
// Why a separate history.jsonl?
//   Listing models should not parse every manifest. One JSON line
//   per registration is enough for `history`, and an append-only
//   file never rewrites earlier entries.
//
// Reference: Burn Book §6 (Saving and Loading Models)
//            serde_json crate documentation

use anyhow::{anyhow, bail, Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::application::pipeline_use_case::PipelineConfig;
use crate::data::preprocessor::StatisticSnapshot;
use crate::infra::metrics::{read_training_log, EpochMetrics, MetricsLogger, TRAINING_LOG_FILE};
use crate::infra::store::{list_versions, version_dir_name, write_synced, StagingDir};
use crate::ml::evaluator::EvaluationMetrics;
use crate::ml::inferencer::Inferencer;
use crate::ml::model::{ChurnClassifier, ChurnClassifierConfig, InferBackend};
use crate::ml::selection::FeatureSelection;

const MODEL_STEM:    &str = "model";
const MANIFEST_FILE: &str = "manifest.json";
const HISTORY_FILE:  &str = "history.jsonl";

/// Registry version id, shown as `v0001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u32);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&version_dir_name(self.0))
    }
}

impl FromStr for VersionId {
    type Err = String;

    /// Accepts "3", "v3" and "v0003".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('v');
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Self(n)),
            _ => Err(format!("'{s}' is not a registry version (expected e.g. 3 or v0003)")),
        }
    }
}

/// Which store versions a model was trained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub bronze: u32,
    pub silver: u32,
    pub gold:   u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryManifest {
    pub version:       VersionId,
    pub registered_at: DateTime<Utc>,
    pub params:        PipelineConfig,
    pub model:         ChurnClassifierConfig,
    pub metrics:       EvaluationMetrics,
    pub snapshot:      StatisticSnapshot,
    pub selection:     FeatureSelection,
    pub lineage:       Lineage,
    pub epochs_run:    usize,
}

/// One line of history.jsonl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version:       VersionId,
    pub registered_at: DateTime<Utc>,
    pub accuracy:      f64,
    pub f1:            f64,
    pub roc_auc:       Option<f64>,
    pub n_features:    usize,
    pub lineage:       Lineage,
}

/// Everything `register` needs, borrowed from the finished run.
pub struct ModelCandidate<'a> {
    pub model:     &'a ChurnClassifier<InferBackend>,
    pub model_cfg: &'a ChurnClassifierConfig,
    pub params:    &'a PipelineConfig,
    pub metrics:   &'a EvaluationMetrics,
    pub snapshot:  &'a StatisticSnapshot,
    pub selection: &'a FeatureSelection,
    pub history:   &'a [EpochMetrics],
    pub lineage:   Lineage,
}

/// A model read back from the registry.
pub struct RegisteredModel {
    pub manifest: RegistryManifest,
    pub model:    ChurnClassifier<InferBackend>,
}

impl RegisteredModel {
    pub fn version(&self) -> VersionId {
        self.manifest.version
    }

    /// Wrap the model with its snapshot and selection for scoring.
    pub fn into_inferencer(self) -> Result<Inferencer> {
        Inferencer::new(self.model, self.manifest.snapshot, self.manifest.selection)
    }
}

pub struct ModelRegistry {
    dir: PathBuf,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::default()
}

impl ModelRegistry {
    /// Open (and create if needed) the registry directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create registry '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    fn version_dir(&self, version: VersionId) -> PathBuf {
        self.dir.join(version.to_string())
    }

    pub fn versions(&self) -> Result<Vec<VersionId>> {
        Ok(list_versions(&self.dir)?.into_iter().map(VersionId).collect())
    }

    pub fn latest(&self) -> Result<Option<VersionId>> {
        Ok(self.versions()?.last().copied())
    }

    /// Persist a model under the next version id.
    ///
    /// The version directory is staged and renamed into place; the
    /// history line is appended last. If that append fails the new
    /// version is removed again, so every visible version has exactly
    /// one history line.
    pub fn register(&self, candidate: ModelCandidate<'_>) -> Result<VersionId> {
        let version = VersionId(self.latest()?.map_or(1, |v| v.0 + 1));
        let staging = StagingDir::create(&self.dir, self.version_dir(version))?;

        // An error here drops `staging`, which deletes it.
        self.write_version(staging.path(), version, &candidate)?;
        let target = staging
            .commit()
            .with_context(|| format!("Cannot commit registry version {version}"))?;

        let entry = HistoryEntry {
            version,
            registered_at: Utc::now(),
            accuracy:      candidate.metrics.accuracy,
            f1:            candidate.metrics.f1,
            roc_auc:       candidate.metrics.roc_auc,
            n_features:    candidate.selection.len(),
            lineage:       candidate.lineage,
        };
        if let Err(e) = self.append_history(&entry) {
            if let Err(cleanup) = fs::remove_dir_all(&target) {
                tracing::warn!("Cannot roll back '{}': {cleanup}", target.display());
            }
            return Err(e.context(format!("Registration of {version} rolled back")));
        }

        tracing::info!("Registered model {} in '{}'", version, self.dir.display());
        Ok(version)
    }

    fn write_version(&self, staging: &Path, version: VersionId, c: &ModelCandidate<'_>) -> Result<()> {
        c.model
            .clone()
            .save_file(staging.join(MODEL_STEM), &recorder())
            .map_err(|e| anyhow!("Cannot save model weights: {e:?}"))?;
        // The recorder writes model.mpk; make it durable before the rename.
        fs::File::open(staging.join(format!("{MODEL_STEM}.mpk")))?.sync_all()?;

        let manifest = RegistryManifest {
            version,
            registered_at: Utc::now(),
            params:        c.params.clone(),
            model:         c.model_cfg.clone(),
            metrics:       c.metrics.clone(),
            snapshot:      c.snapshot.clone(),
            selection:     c.selection.clone(),
            lineage:       c.lineage,
            epochs_run:    c.history.len(),
        };
        write_synced(&staging.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)?;

        MetricsLogger::create(staging)?.log_all(c.history)?;
        Ok(())
    }

    fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let path = self.dir.join(HISTORY_FILE);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Cannot open '{}'", path.display()))?;
        writeln!(f, "{}", serde_json::to_string(entry)?)?;
        f.sync_all()?;
        Ok(())
    }

    pub fn load_manifest(&self, version: VersionId) -> Result<RegistryManifest> {
        let path = self.version_dir(version).join(MANIFEST_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read '{}'. Has model {version} been registered?",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed manifest '{}'", path.display()))
    }

    /// Rebuild the classifier from its manifest and load the stored weights.
    pub fn load(&self, version: VersionId) -> Result<RegisteredModel> {
        let manifest = self.load_manifest(version)?;
        manifest.snapshot.ensure_train_provenance()?;

        let device = Default::default();
        let model: ChurnClassifier<InferBackend> = manifest.model.init(&device);
        let model = model
            .load_file(self.version_dir(version).join(MODEL_STEM), &recorder(), &device)
            .map_err(|e| anyhow!("Cannot load weights of model {version}: {e:?}"))?;

        tracing::info!("Loaded model {} ({} features)", version, manifest.selection.len());
        Ok(RegisteredModel { manifest, model })
    }

    /// Load `version`, or the newest one when None.
    pub fn load_or_latest(&self, version: Option<VersionId>) -> Result<RegisteredModel> {
        let version = match version {
            Some(v) => v,
            None => self.latest()?.with_context(|| {
                format!("Registry '{}' is empty. Run the pipeline first.", self.dir.display())
            })?,
        };
        self.load(version)
    }

    /// Per-epoch loss and accuracy recorded when `version` was trained.
    pub fn training_log(&self, version: VersionId) -> Result<Vec<EpochMetrics>> {
        let path = self.version_dir(version).join(TRAINING_LOG_FILE);
        if !path.exists() {
            bail!("Model {version} is not registered in '{}'", self.dir.display());
        }
        read_training_log(&path)
    }

    /// Every registration, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let path = self.dir.join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line).with_context(|| {
                format!("Malformed line {} in '{}'", i + 1, path.display())
            })?);
        }
        Ok(entries)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        features::derive_domain_features,
        generator::{GeneratorConfig, SyntheticGenerator},
        loader::records_to_dataset,
        preprocessor::{TransformConfig, Transformer},
        splitter::{stratified_split, Split},
    };
    use crate::domain::dataset::Test;
    use crate::domain::feature_matrix::FeatureMatrix;
    use crate::ml::{
        evaluator::evaluate,
        forest::ForestConfig,
        selection::{FeatureSelector, SelectionConfig},
        trainer::{predict_proba, train_classifier, ClassifierConfig, TrainedClassifier},
    };

    #[test]
    fn test_version_id_parse_and_display() {
        assert_eq!("3".parse::<VersionId>().unwrap(), VersionId(3));
        assert_eq!("v0012".parse::<VersionId>().unwrap(), VersionId(12));
        assert!("v0".parse::<VersionId>().is_err());
        assert!("latest".parse::<VersionId>().is_err());
        assert_eq!(VersionId(7).to_string(), "v0007");
    }

    #[test]
    fn test_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.latest().unwrap(), None);
        assert!(registry.history().unwrap().is_empty());
        assert!(registry.load_or_latest(None).is_err());
    }

    /// Everything a registration needs, fitted on a small synthetic run.
    struct Fitted {
        snapshot:  StatisticSnapshot,
        selection: FeatureSelection,
        trained:   TrainedClassifier,
        metrics:   EvaluationMetrics,
        test:      FeatureMatrix<Test>,
        params:    PipelineConfig,
    }

    impl Fitted {
        fn candidate(&self) -> ModelCandidate<'_> {
            ModelCandidate {
                model:     &self.trained.model,
                model_cfg: &self.trained.model_cfg,
                params:    &self.params,
                metrics:   &self.metrics,
                snapshot:  &self.snapshot,
                selection: &self.selection,
                history:   &self.trained.history,
                lineage:   Lineage { bronze: 1, silver: 1, gold: 1 },
            }
        }
    }

    fn fitted() -> Fitted {
        let gen = SyntheticGenerator::new(GeneratorConfig { n_records: 300, ..Default::default() });
        let raw = records_to_dataset(&gen.generate(300)).unwrap();
        let Split { train, test } = stratified_split(raw, 0.8, 1).unwrap();
        let train = derive_domain_features(train).unwrap();
        let test  = derive_domain_features(test).unwrap();

        let snapshot = Transformer::new(TransformConfig::default()).fit(&train).unwrap();
        let train_m  = snapshot.vectorize(&snapshot.apply(&train).unwrap()).unwrap();
        let test_m   = snapshot.vectorize(&snapshot.apply(&test).unwrap()).unwrap();
        let selection = FeatureSelector::new(SelectionConfig {
            forest: ForestConfig { n_trees: 5, ..Default::default() },
            ..Default::default()
        })
        .fit(&train_m)
        .unwrap();
        let train_m = selection.apply(&train_m).unwrap();
        let test    = selection.apply(&test_m).unwrap();

        let trained = train_classifier(&ClassifierConfig { epochs: 3, ..Default::default() }, &train_m).unwrap();
        let metrics = evaluate(&trained.model, &test, 0.5).unwrap();
        Fitted { snapshot, selection, trained, metrics, test, params: PipelineConfig::default() }
    }

    #[test]
    fn test_register_then_load_predicts_identically() {
        let fit = fitted();
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let v1 = registry.register(fit.candidate()).unwrap();
        assert_eq!(v1, VersionId(1));

        let loaded = registry.load(v1).unwrap();
        let (n, d) = (fit.test.n_rows(), fit.test.n_features());
        let before = predict_proba(&fit.trained.model, fit.test.to_f32_row_major(), n, d).unwrap();
        let after  = predict_proba(&loaded.model, fit.test.to_f32_row_major(), n, d).unwrap();
        assert_eq!(before, after);

        assert_eq!(loaded.manifest.snapshot, fit.snapshot);
        assert_eq!(loaded.manifest.selection, fit.selection);
        assert_eq!(loaded.manifest.epochs_run, 3);
        let log = registry.training_log(v1).unwrap();
        assert_eq!(log.len(), fit.trained.history.len());
        for (read, trained) in log.iter().zip(&fit.trained.history) {
            assert_eq!(read.epoch, trained.epoch);
            assert!((read.train_loss - trained.train_loss).abs() < 1e-6);
        }
        assert!(registry.training_log(VersionId(9)).is_err());

        // A second registration never touches the first.
        let v2 = registry.register(fit.candidate()).unwrap();
        assert_eq!(v2, VersionId(2));
        assert_eq!(registry.latest().unwrap(), Some(v2));
        let history = registry.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, v1);
        assert_eq!(history[0].f1, fit.metrics.f1);
    }

    #[test]
    fn test_failed_history_append_rolls_back_version() {
        let fit = fitted();
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        // A directory where the history file should be makes the append fail.
        fs::create_dir_all(dir.path().join(HISTORY_FILE)).unwrap();

        let err = registry.register(fit.candidate()).unwrap_err();
        assert!(format!("{err:#}").contains("rolled back"));
        assert!(registry.versions().unwrap().is_empty());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n != HISTORY_FILE)
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
