// ============================================================
// Layer 2 — PipelineUseCase
// ============================================================
// Orchestrates the full churn pipeline in a fixed order:
//
//   Stage 1: Ingest     generate + import → Bronze     (Layer 4, 6)
//   Stage 2: Split      stratified train/test          (Layer 4)
//   Stage 3: Clean      derive features, fit snapshot
//                       on train, apply to both → Silver
//   Stage 4: Resample   vectorize, SMOTE on train only
//   Stage 5: Select     forest importance on train,
//                       same selection on both → Gold
//   Stage 6: Train      logistic regression on train   (Layer 5)
//   Stage 7: Evaluate   once, on the test matrix       (Layer 5)
//   Stage 8: Register   model + manifest + history     (Layer 6)
//
// Each stage takes the previous stage's typed output as an
// argument, so the order is enforced by data dependencies. The
// train and test partitions travel as separate values typed
// Train / Test from Stage 2 on.
//
// A failing stage aborts the run; its error is wrapped with the
// stage name. Nothing is persisted for a stage that failed.
//
// Why pass partitions as separate typed values?
//   A single table with a "split" column relies on every stage
//   filtering correctly. Separate Dataset<Train> / Dataset<Test>
//   values make a stage that touches the wrong rows fail to compile.
//
// Reference: Rust Book §9 (Error Handling), §10 (Generic Types)
//            anyhow crate documentation (Context)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

use crate::data::{
    features::derive_domain_features,
    generator::{GeneratorConfig, SyntheticGenerator},
    loader::{combine_sources, CsvRecordSource},
    preprocessor::{StatisticSnapshot, TransformConfig, Transformer},
    resampler::Smote,
    splitter::{stratified_split, Split},
};
use crate::domain::dataset::{Dataset, PartitionTag, Test, Train, Unpartitioned};
use crate::domain::error::PipelineError;
use crate::domain::feature_matrix::FeatureMatrix;
use crate::domain::traits::RecordSource;
use crate::infra::{
    registry::{Lineage, ModelCandidate, ModelRegistry, VersionId},
    store::{Layer, LayeredStore},
};
use crate::ml::{
    evaluator::{evaluate, EvaluationMetrics},
    selection::{FeatureSelection, FeatureSelector, SelectionConfig},
    trainer::{train_classifier, ClassifierConfig},
};

// ─── Pipeline Configuration ──────────────────────────────────────────────────
// Every recognized option of a run. Serialisable so it is stored
// in the registry manifest and a run can be reproduced from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub store_dir:          PathBuf,
    pub registry_dir:       PathBuf,
    /// Optional Telco-format CSV combined with the synthetic records.
    pub original_csv:       Option<PathBuf>,
    /// Reuse this Bronze version instead of ingesting new data.
    pub bronze_version:     Option<u32>,
    pub seed:               u64,
    pub train_fraction:     f64,
    pub generator:          GeneratorConfig,
    pub transform:          TransformConfig,
    pub smote_ratio:        f64,
    pub smote_k:            usize,
    pub selection:          SelectionConfig,
    pub classifier:         ClassifierConfig,
    pub decision_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_dir:          PathBuf::from("store"),
            registry_dir:       PathBuf::from("registry"),
            original_csv:       None,
            bronze_version:     None,
            seed:               42,
            train_fraction:     0.8,
            generator:          GeneratorConfig::default(),
            transform:          TransformConfig::default(),
            smote_ratio:        1.0,
            smote_k:            5,
            selection:          SelectionConfig::default(),
            classifier:         ClassifierConfig::default(),
            decision_threshold: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Set one seed for every randomized step.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed                  = seed;
        self.generator.seed        = seed;
        self.selection.forest.seed = seed;
        self.classifier.seed       = seed;
        self
    }

    /// Range-check every option before any stage runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let bad = |msg: String| Err(PipelineError::Config(msg));

        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return bad(format!("train_fraction must be in (0, 1), got {}", self.train_fraction));
        }
        if !(self.smote_ratio > 0.0 && self.smote_ratio <= 1.0) {
            return bad(format!("smote_ratio must be in (0, 1], got {}", self.smote_ratio));
        }
        if self.smote_k == 0 {
            return bad("smote_k must be at least 1".into());
        }
        if !(self.decision_threshold > 0.0 && self.decision_threshold < 1.0) {
            return bad(format!(
                "decision_threshold must be in (0, 1), got {}",
                self.decision_threshold
            ));
        }
        let imp = self.selection.importance_threshold;
        if !(0.0..1.0).contains(&imp) {
            return bad(format!("importance_threshold must be in [0, 1), got {imp}"));
        }
        if self.selection.forest.n_trees == 0 || self.selection.forest.max_depth == 0 {
            return bad("forest_trees and forest_depth must be at least 1".into());
        }
        for (name, rate) in [
            ("missing_rate", self.generator.missing_rate),
            ("outlier_rate", self.generator.outlier_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return bad(format!("{name} must be in [0, 1], got {rate}"));
            }
        }
        if !(self.transform.iqr_multiplier >= 0.0) {
            return bad(format!(
                "iqr_multiplier must be non-negative, got {}",
                self.transform.iqr_multiplier
            ));
        }
        if !(self.transform.skew_threshold >= 0.0) {
            return bad(format!(
                "skew_threshold must be non-negative, got {}",
                self.transform.skew_threshold
            ));
        }
        if self.bronze_version.is_none()
            && self.generator.n_records == 0
            && self.original_csv.is_none()
        {
            return bad("no data source: set records > 0 or give an original CSV".into());
        }
        self.classifier.validate()
    }
}

// ─── Stages ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Split,
    Clean,
    Resample,
    Select,
    Train,
    Evaluate,
    Register,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Ingest   => "ingest",
            Stage::Split    => "split",
            Stage::Clean    => "clean",
            Stage::Resample => "resample",
            Stage::Select   => "select",
            Stage::Train    => "train",
            Stage::Evaluate => "evaluate",
            Stage::Register => "register",
        })
    }
}

/// Silver output: cleaned partitions plus the snapshot that cleaned them.
pub struct Cleaned {
    pub train:    Dataset<Train>,
    pub test:     Dataset<Test>,
    pub snapshot: StatisticSnapshot,
    pub version:  u32,
}

/// Gold output: selected matrices, train already resampled.
pub struct ModelReady {
    pub train:     FeatureMatrix<Train>,
    pub test:      FeatureMatrix<Test>,
    pub selection: FeatureSelection,
    pub version:   u32,
}

/// What a finished run reports back to the CLI.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub lineage:       Lineage,
    pub model_version: VersionId,
    pub train_rows:    usize,
    pub test_rows:     usize,
    pub features:      Vec<String>,
    pub metrics:       EvaluationMetrics,
}

// ─── PipelineUseCase ─────────────────────────────────────────────────────────
pub struct PipelineUseCase {
    config: PipelineConfig,
}

impl PipelineUseCase {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage end to end.
    pub fn execute(&self) -> Result<PipelineReport> {
        let cfg      = &self.config;
        let store    = LayeredStore::open(&cfg.store_dir)?;
        let registry = ModelRegistry::open(&cfg.registry_dir)?;

        // ── Stage 1: Ingest ───────────────────────────────────────────────────
        let (bronze_version, raw) = match cfg.bronze_version {
            Some(v) => {
                let meta = store
                    .read_meta(Layer::Bronze, v)
                    .with_context(|| stage_failed(Stage::Ingest))?;
                let raw = store
                    .read_dataset::<Unpartitioned>(Layer::Bronze, v)
                    .with_context(|| stage_failed(Stage::Ingest))?;
                tracing::info!(
                    "Reusing Bronze v{v:04} from {}: {} records",
                    meta.created_at.format("%Y-%m-%d %H:%M:%S"),
                    raw.len()
                );
                (v, raw)
            }
            None => self.ingest(&store).with_context(|| stage_failed(Stage::Ingest))?,
        };

        // ── Stage 2: Split ────────────────────────────────────────────────────
        let split = stratified_split(raw, cfg.train_fraction, cfg.seed)
            .with_context(|| stage_failed(Stage::Split))?;
        tracing::info!(
            "[{}] train={} ({:.1}% churn), test={} ({:.1}% churn)",
            Stage::Split,
            split.train.len(),
            split.train.churn_rate() * 100.0,
            split.test.len(),
            split.test.churn_rate() * 100.0,
        );

        // ── Stage 3: Clean ────────────────────────────────────────────────────
        let cleaned = self.clean(&store, split).with_context(|| stage_failed(Stage::Clean))?;

        // ── Stage 4: Resample ─────────────────────────────────────────────────
        let (train_matrix, test_matrix) = self
            .resample(&cleaned)
            .with_context(|| stage_failed(Stage::Resample))?;

        // ── Stage 5: Select ───────────────────────────────────────────────────
        let gold = self
            .select(&store, train_matrix, test_matrix)
            .with_context(|| stage_failed(Stage::Select))?;

        // ── Stage 6: Train ────────────────────────────────────────────────────
        let trained = train_classifier(&cfg.classifier, &gold.train)
            .with_context(|| stage_failed(Stage::Train))?;

        // ── Stage 7: Evaluate ─────────────────────────────────────────────────
        let metrics = evaluate(&trained.model, &gold.test, cfg.decision_threshold)
            .with_context(|| stage_failed(Stage::Evaluate))?;

        // ── Stage 8: Register ─────────────────────────────────────────────────
        let lineage = Lineage {
            bronze: bronze_version,
            silver: cleaned.version,
            gold:   gold.version,
        };
        let model_version = registry
            .register(ModelCandidate {
                model:     &trained.model,
                model_cfg: &trained.model_cfg,
                params:    cfg,
                metrics:   &metrics,
                snapshot:  &cleaned.snapshot,
                selection: &gold.selection,
                history:   &trained.history,
                lineage,
            })
            .with_context(|| stage_failed(Stage::Register))?;

        Ok(PipelineReport {
            lineage,
            model_version,
            train_rows: gold.train.n_rows(),
            test_rows:  gold.test.n_rows(),
            features:   gold.selection.selected.clone(),
            metrics,
        })
    }

    /// Stage 1 on its own: build the raw dataset and commit it to Bronze.
    pub fn ingest(&self, store: &LayeredStore) -> Result<(u32, Dataset<Unpartitioned>)> {
        let cfg = &self.config;
        let synthetic = SyntheticGenerator::new(cfg.generator.clone());
        let original  = cfg.original_csv.as_ref().map(CsvRecordSource::new);

        let mut sources: Vec<&dyn RecordSource> = Vec::new();
        if let Some(csv) = &original {
            sources.push(csv);
        }
        if cfg.generator.n_records > 0 {
            sources.push(&synthetic);
        }

        let raw = combine_sources(&sources)?;
        // A missing original CSV only warns; with no synthetic records
        // that leaves nothing, and an empty Bronze version is never written.
        if raw.is_empty() {
            return Err(PipelineError::data_quality(
                PartitionTag::Unpartitioned,
                "*",
                "no records from any source",
            )
            .into());
        }
        tracing::info!(
            "[{}] {} raw records, {:.1}% churn",
            Stage::Ingest,
            raw.len(),
            raw.churn_rate() * 100.0
        );

        let mut staged = store.begin(Layer::Bronze)?;
        staged.write_dataset(&raw)?;
        let version = staged.commit()?;
        Ok((version, raw))
    }

    fn clean(&self, store: &LayeredStore, split: Split) -> Result<Cleaned> {
        let Split { train, test } = split;
        let train = derive_domain_features(train)?;
        let test  = derive_domain_features(test)?;

        // Fit sees the training partition only.
        let snapshot = Transformer::new(self.config.transform.clone()).fit(&train)?;
        let train = snapshot.apply(&train)?;
        let test  = snapshot.apply(&test)?;
        train.schema().ensure_matches(test.schema(), test.partition())?;

        let mut staged = store.begin(Layer::Silver)?;
        staged.write_dataset(&train)?;
        staged.write_dataset(&test)?;
        staged.write_json("snapshot.json", &snapshot)?;
        let version = staged.commit()?;

        tracing::info!(
            "[{}] snapshot fitted on {} train rows, {} features after encoding",
            Stage::Clean,
            snapshot.fitted_rows(),
            snapshot.feature_names().len()
        );
        Ok(Cleaned { train, test, snapshot, version })
    }

    fn resample(&self, cleaned: &Cleaned) -> Result<(FeatureMatrix<Train>, FeatureMatrix<Test>)> {
        let train = cleaned.snapshot.vectorize(&cleaned.train)?;
        let test  = cleaned.snapshot.vectorize(&cleaned.test)?;
        test.ensure_same_features(&train)?;

        let before = train.class_ratio();
        let train  = Smote::new(self.config.smote_ratio, self.config.smote_k, self.config.seed)?
            .resample(train)?;
        tracing::info!(
            "[{}] train class ratio {:.3} → {:.3} ({} rows); test left at {} rows",
            Stage::Resample,
            before,
            train.class_ratio(),
            train.n_rows(),
            test.n_rows()
        );
        Ok((train, test))
    }

    fn select(
        &self,
        store: &LayeredStore,
        train: FeatureMatrix<Train>,
        test:  FeatureMatrix<Test>,
    ) -> Result<ModelReady> {
        let selection = FeatureSelector::new(self.config.selection.clone()).fit(&train)?;
        let train = selection.apply(&train)?;
        let test  = selection.apply(&test)?;
        test.ensure_same_features(&train)?;

        let mut staged = store.begin(Layer::Gold)?;
        staged.write_matrix(&train)?;
        staged.write_matrix(&test)?;
        staged.write_json("selection.json", &selection)?;
        let version = staged.commit()?;

        tracing::info!("[{}] {} features kept", Stage::Select, selection.len());
        Ok(ModelReady { train, test, selection, version })
    }
}

fn stage_failed(stage: Stage) -> String {
    format!("Pipeline stage '{stage}' failed")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::loader::records_to_dataset;
    use crate::data::preprocessor::UnseenCategoryPolicy;
    use crate::domain::schema::Value;
    use crate::ml::forest::ForestConfig;
    use std::path::Path;

    /// A config small enough for unit tests, rooted in `dir`.
    pub(crate) fn test_config(dir: &Path) -> PipelineConfig {
        let mut cfg = PipelineConfig {
            store_dir:    dir.join("store"),
            registry_dir: dir.join("registry"),
            ..Default::default()
        }
        .with_seed(7);
        cfg.generator.n_records = 600;
        cfg.selection.forest = ForestConfig { n_trees: 15, seed: 7, ..Default::default() };
        cfg.classifier.epochs = 8;
        cfg
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let report = PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap();

        assert_eq!(report.model_version, VersionId(1));
        assert_eq!(report.lineage, Lineage { bronze: 1, silver: 1, gold: 1 });
        assert!(!report.features.is_empty());
        // 600 records split 80/20 (±1 per class)
        assert!((report.test_rows as i64 - 120).abs() <= 2);
        assert_eq!(report.metrics.support, report.test_rows);
        assert!(report.metrics.accuracy > 0.5);

        let store = LayeredStore::open(&cfg.store_dir).unwrap();
        for layer in [Layer::Bronze, Layer::Silver, Layer::Gold] {
            assert_eq!(store.versions(layer).unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_test_partition_is_never_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap();

        let store = LayeredStore::open(&cfg.store_dir).unwrap();
        let silver_test: Dataset<Test> = store.read_dataset(Layer::Silver, 1).unwrap();
        let gold_test: FeatureMatrix<Test> = store.read_matrix(Layer::Gold, 1).unwrap();
        let gold_train: FeatureMatrix<Train> = store.read_matrix(Layer::Gold, 1).unwrap();

        let silver_ids: Vec<&str> = silver_test.ids().collect();
        let gold_ids: Vec<&str> = gold_test.ids().iter().map(String::as_str).collect();
        assert_eq!(silver_ids, gold_ids);
        assert_eq!(gold_test.class_counts().1, silver_test.churn_count());

        // Train was balanced to the target ratio; synthetic ids are marked.
        assert!((gold_train.class_ratio() - 1.0).abs() < 0.01);
        assert!(gold_train.ids().iter().any(|id| id.starts_with("smote-")));
        assert!(gold_test.ids().iter().all(|id| !id.starts_with("smote-")));
    }

    #[test]
    fn test_snapshot_ignores_test_partition_contents() {
        // Same train rows, wildly different test rows → identical snapshot.
        let dir = tempfile::tempdir().unwrap();
        let raw = records_to_dataset(&SyntheticGenerator::new(GeneratorConfig {
            n_records: 300,
            ..Default::default()
        })
        .generate(300))
        .unwrap();
        let split = stratified_split(raw, 0.8, 3).unwrap();

        let mut corrupted_rows = split.test.clone().into_rows();
        for row in &mut corrupted_rows {
            for v in &mut row.values {
                if let Value::Number(x) = v {
                    *x = *x * 1000.0 + 12345.0;
                }
            }
        }
        let corrupted = Dataset::<Test>::checked(split.test.schema().clone(), corrupted_rows).unwrap();

        let use_case = PipelineUseCase::new(test_config(dir.path())).unwrap();
        let store_a  = LayeredStore::open(dir.path().join("a")).unwrap();
        let store_b  = LayeredStore::open(dir.path().join("b")).unwrap();
        let a = use_case.clean(&store_a, Split { train: split.train.clone(), test: split.test }).unwrap();
        let b = use_case.clean(&store_b, Split { train: split.train, test: corrupted }).unwrap();

        assert_eq!(a.snapshot, b.snapshot);
        assert_eq!(
            serde_json::to_string(&a.snapshot).unwrap(),
            serde_json::to_string(&b.snapshot).unwrap()
        );
    }

    #[test]
    fn test_second_run_gets_next_versions() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap();
        let again = PipelineConfig { bronze_version: Some(1), ..cfg };
        let report = PipelineUseCase::new(again).unwrap().execute().unwrap();
        assert_eq!(report.model_version, VersionId(2));
        assert_eq!(report.lineage, Lineage { bronze: 1, silver: 2, gold: 2 });
    }

    /// Commit a Bronze version where exactly one test-side customer
    /// holds a contract type the training partition never sees.
    fn bronze_with_unseen_test_category(cfg: &PipelineConfig) -> String {
        let mut records = SyntheticGenerator::new(cfg.generator.clone()).generate(cfg.generator.n_records);
        // Placement depends on ids, labels and the seed only, so the
        // edit below does not move the customer across partitions.
        let split = stratified_split(records_to_dataset(&records).unwrap(), cfg.train_fraction, cfg.seed).unwrap();
        let target = split.test.ids().next().unwrap().to_string();
        let record = records.iter_mut().find(|r| r.customer_id == target).unwrap();
        record.contract = Some("Decade".to_string());

        let store = LayeredStore::open(&cfg.store_dir).unwrap();
        let mut staged = store.begin(Layer::Bronze).unwrap();
        staged.write_dataset(&records_to_dataset(&records).unwrap()).unwrap();
        staged.commit().unwrap();
        target
    }

    #[test]
    fn test_unseen_test_category_fails_under_fail_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        let target = bronze_with_unseen_test_category(&cfg);
        cfg.bronze_version = Some(1);
        cfg.transform.unseen_policy = UnseenCategoryPolicy::Fail;

        let err = PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("stage 'resample'"), "{msg}");
        assert!(msg.contains("test partition"), "{msg}");
        assert!(msg.contains("Decade") && msg.contains(&target), "{msg}");
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Schema { .. })));

        // Nothing reached Gold or the registry.
        let store = LayeredStore::open(&cfg.store_dir).unwrap();
        assert!(store.versions(Layer::Gold).unwrap().is_empty());
        assert_eq!(ModelRegistry::open(&cfg.registry_dir).unwrap().latest().unwrap(), None);
    }

    #[test]
    fn test_unseen_test_category_goes_to_unknown_bucket_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        bronze_with_unseen_test_category(&cfg);
        cfg.bronze_version = Some(1);

        let report = PipelineUseCase::new(cfg).unwrap().execute().unwrap();
        assert_eq!(report.model_version, VersionId(1));
    }

    #[test]
    fn test_invalid_config_rejected_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.train_fraction = 1.2;
        let err = PipelineUseCase::new(cfg).err().unwrap();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_))));
        assert!(!dir.path().join("store").exists());
    }

    #[test]
    fn test_no_records_from_any_source_writes_no_bronze() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.generator.n_records = 0;
        cfg.original_csv = Some(dir.path().join("nope.csv"));
        assert!(cfg.validate().is_ok());

        let err = PipelineUseCase::new(cfg.clone()).unwrap().execute().unwrap_err();
        assert!(format!("{err:#}").contains("stage 'ingest'"));
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DataQuality { .. })
        ));

        let store = LayeredStore::open(&cfg.store_dir).unwrap();
        assert!(store.versions(Layer::Bronze).unwrap().is_empty());
    }

    #[test]
    fn test_stage_failure_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig { bronze_version: Some(9), ..test_config(dir.path()) };
        let err = PipelineUseCase::new(cfg).unwrap().execute().unwrap_err();
        assert!(format!("{err:#}").contains("stage 'ingest'"));
    }
}
