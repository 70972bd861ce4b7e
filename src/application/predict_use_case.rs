// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Scores raw customer records with a registered model:
//   1. Load the requested (or newest) registry version
//   2. Read raw records from a Telco CSV or a Bronze version
//   3. Replay the stored snapshot + selection, then the model
//
// Nothing is fitted here. Every statistic comes from the
// manifest that was written when the model was registered.
//
// Reference: Burn Book §6 (Saving and Loading Models)

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::data::loader::{combine_sources, CsvRecordSource};
use crate::domain::dataset::{Dataset, Unpartitioned};
use crate::domain::traits::RecordSource;
use crate::infra::{
    registry::{ModelRegistry, VersionId},
    store::{Layer, LayeredStore},
};
use crate::ml::inferencer::ChurnScore;

/// Where the records to score come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringInput {
    Csv(PathBuf),
    /// A Bronze version; None picks the newest.
    Bronze(Option<u32>),
}

#[derive(Debug, Clone)]
pub struct PredictConfig {
    pub registry_dir: PathBuf,
    pub store_dir:    PathBuf,
    pub version:      Option<VersionId>,
    pub input:        ScoringInput,
}

/// Scores plus the version that produced them.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub version: VersionId,
    pub scores:  Vec<ChurnScore>,
}

pub struct PredictUseCase {
    config: PredictConfig,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Prediction> {
        let registry   = ModelRegistry::open(&self.config.registry_dir)?;
        let registered = registry.load_or_latest(self.config.version)?;
        let version    = registered.version();
        let inferencer = registered.into_inferencer()?;

        let raw = self.load_input()?;
        if raw.is_empty() {
            bail!("No records to score in {:?}", self.config.input);
        }
        tracing::info!("Scoring {} records with model {}", raw.len(), version);

        let scores = inferencer.score(raw)?;
        Ok(Prediction { version, scores })
    }

    fn load_input(&self) -> Result<Dataset<Unpartitioned>> {
        match &self.config.input {
            ScoringInput::Csv(path) => {
                let source = CsvRecordSource::new(path);
                let sources: [&dyn RecordSource; 1] = [&source];
                combine_sources(&sources)
            }
            ScoringInput::Bronze(version) => {
                let store   = LayeredStore::open(&self.config.store_dir)?;
                let version = match version {
                    Some(v) => *v,
                    None    => store.require_latest(Layer::Bronze)?,
                };
                store.read_dataset(Layer::Bronze, version)
            }
        }
    }
}
