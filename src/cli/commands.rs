// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands and their flags:
//   run       full pipeline: Bronze → Silver → Gold → registry
//   generate  Stage 1 only: write a new Bronze version
//   predict   score raw records with a registered model
//   history   list registered models
//
// clap's derive macros generate the --help text, the errors for
// bad values, and the string → number / enum conversions.
//
// Reference: clap derive tutorial
//            Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::pipeline_use_case::PipelineConfig;
use crate::application::predict_use_case::{PredictConfig, ScoringInput};
use crate::data::generator::GeneratorConfig;
use crate::data::preprocessor::{TransformConfig, UnseenCategoryPolicy};
use crate::infra::registry::VersionId;
use crate::ml::forest::ForestConfig;
use crate::ml::selection::SelectionConfig;
use crate::ml::trainer::ClassifierConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the whole pipeline and register the trained model
    Run(RunArgs),

    /// Generate (and optionally import) raw records into a new Bronze version
    Generate(GenerateArgs),

    /// Score raw customer records with a registered model
    Predict(PredictArgs),

    /// List registered models, oldest first
    History(HistoryArgs),
}

/// Where raw records come from. Shared by `run` and `generate`.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Number of synthetic customers to generate
    #[arg(long, default_value_t = 5000)]
    pub records: usize,

    /// Share of attribute cells blanked out in synthetic data
    #[arg(long, default_value_t = 0.02)]
    pub missing_rate: f64,

    /// Share of synthetic customers given an implausible charge
    #[arg(long, default_value_t = 0.01)]
    pub outlier_rate: f64,

    /// Telco-format CSV combined with the synthetic records
    #[arg(long)]
    pub original_csv: Option<PathBuf>,

    /// Seed for every randomized step
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Root of the Bronze / Silver / Gold store
    #[arg(long, default_value = "store")]
    pub store_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Train on an existing Bronze version instead of ingesting new data
    #[arg(long)]
    pub bronze_version: Option<u32>,

    /// Directory of the model registry
    #[arg(long, default_value = "registry")]
    pub registry_dir: PathBuf,

    /// Share of each class sent to the training partition
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    /// Outlier fence width in interquartile ranges
    #[arg(long, default_value_t = 1.5)]
    pub iqr_multiplier: f64,

    /// |skewness| above which a column is log-transformed
    #[arg(long, default_value_t = 0.75)]
    pub skew_threshold: f64,

    /// Categories unseen in training: `unknown` bucket or `fail`
    #[arg(long, default_value_t = UnseenCategoryPolicy::Unknown)]
    pub unseen_policy: UnseenCategoryPolicy,

    /// Target minority / majority ratio after SMOTE, in (0, 1]
    #[arg(long, default_value_t = 1.0)]
    pub smote_ratio: f64,

    /// Neighbours considered per minority row by SMOTE
    #[arg(long, default_value_t = 5)]
    pub smote_k: usize,

    /// Features below this normalized importance are dropped
    #[arg(long, default_value_t = 0.01)]
    pub importance_threshold: f64,

    /// Trees in the importance forest
    #[arg(long, default_value_t = 100)]
    pub forest_trees: usize,

    /// Maximum depth of each forest tree
    #[arg(long, default_value_t = 8)]
    pub forest_depth: usize,

    /// Passes over the training matrix
    #[arg(long, default_value_t = 30)]
    pub epochs: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.05)]
    pub lr: f64,

    /// Rows per optimizer step
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// P(churn) at or above which a customer is predicted to churn
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,
}

fn generator_config(s: &SourceArgs) -> GeneratorConfig {
    GeneratorConfig {
        n_records:    s.records,
        seed:         s.seed,
        missing_rate: s.missing_rate,
        outlier_rate: s.outlier_rate,
        ..Default::default()
    }
}

/// Convert CLI RunArgs into the application-layer PipelineConfig.
/// The application layer never sees clap types.
impl From<RunArgs> for PipelineConfig {
    fn from(a: RunArgs) -> Self {
        let seed = a.source.seed;
        PipelineConfig {
            generator:          generator_config(&a.source),
            store_dir:          a.source.store_dir,
            registry_dir:       a.registry_dir,
            original_csv:       a.source.original_csv,
            bronze_version:     a.bronze_version,
            seed,
            train_fraction:     a.train_fraction,
            transform: TransformConfig {
                iqr_multiplier: a.iqr_multiplier,
                skew_threshold: a.skew_threshold,
                unseen_policy:  a.unseen_policy,
            },
            smote_ratio:        a.smote_ratio,
            smote_k:            a.smote_k,
            selection: SelectionConfig {
                importance_threshold: a.importance_threshold,
                forest: ForestConfig {
                    n_trees:   a.forest_trees,
                    max_depth: a.forest_depth,
                    seed,
                    ..Default::default()
                },
            },
            classifier: ClassifierConfig {
                epochs:        a.epochs,
                learning_rate: a.lr,
                batch_size:    a.batch_size,
                seed,
            },
            decision_threshold: a.threshold,
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Generation only needs the source half of the config.
impl From<GenerateArgs> for PipelineConfig {
    fn from(a: GenerateArgs) -> Self {
        PipelineConfig {
            generator:    generator_config(&a.source),
            store_dir:    a.source.store_dir,
            original_csv: a.source.original_csv,
            ..Default::default()
        }
        .with_seed(a.source.seed)
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Registry version to use (e.g. 3 or v0003); newest when omitted
    #[arg(long)]
    pub model_version: Option<VersionId>,

    /// Telco-format CSV of customers to score
    #[arg(long, conflicts_with = "bronze_version")]
    pub csv: Option<PathBuf>,

    /// Bronze version to score; newest when neither this nor --csv is given
    #[arg(long)]
    pub bronze_version: Option<u32>,

    /// Print only the first N scores
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, default_value = "registry")]
    pub registry_dir: PathBuf,

    #[arg(long, default_value = "store")]
    pub store_dir: PathBuf,
}

impl From<&PredictArgs> for PredictConfig {
    fn from(a: &PredictArgs) -> Self {
        let input = match &a.csv {
            Some(path) => ScoringInput::Csv(path.clone()),
            None       => ScoringInput::Bronze(a.bronze_version),
        };
        PredictConfig {
            registry_dir: a.registry_dir.clone(),
            store_dir:    a.store_dir.clone(),
            version:      a.model_version,
            input,
        }
    }
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show only the newest N registrations
    #[arg(long)]
    pub limit: Option<usize>,

    /// Print this model's per-epoch training curve instead of the list
    #[arg(long, conflicts_with = "limit")]
    pub model_version: Option<VersionId>,

    #[arg(long, default_value = "registry")]
    pub registry_dir: PathBuf,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["churn-pipeline"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn test_run_defaults_match_pipeline_defaults() {
        let Commands::Run(args) = parse(&["run"]) else { panic!("expected run") };
        let cfg: PipelineConfig = args.into();
        let def = PipelineConfig::default();
        assert_eq!(cfg.train_fraction, def.train_fraction);
        assert_eq!(cfg.smote_ratio, def.smote_ratio);
        assert_eq!(cfg.smote_k, def.smote_k);
        assert_eq!(cfg.generator.n_records, def.generator.n_records);
        assert_eq!(cfg.selection.forest.n_trees, def.selection.forest.n_trees);
        assert_eq!(cfg.classifier.epochs, def.classifier.epochs);
        assert_eq!(cfg.transform.unseen_policy, UnseenCategoryPolicy::Unknown);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_seed_reaches_every_stage() {
        let Commands::Run(args) = parse(&["run", "--seed", "9", "--unseen-policy", "fail"]) else {
            panic!("expected run")
        };
        let cfg: PipelineConfig = args.into();
        assert_eq!(cfg.seed, 9);
        assert_eq!(cfg.generator.seed, 9);
        assert_eq!(cfg.selection.forest.seed, 9);
        assert_eq!(cfg.classifier.seed, 9);
        assert_eq!(cfg.transform.unseen_policy, UnseenCategoryPolicy::Fail);
    }

    #[test]
    fn test_predict_input_selection() {
        let Commands::Predict(args) = parse(&["predict", "--model-version", "v0002", "--csv", "x.csv"]) else {
            panic!("expected predict")
        };
        let cfg = PredictConfig::from(&args);
        assert_eq!(cfg.version, Some(VersionId(2)));
        assert_eq!(cfg.input, ScoringInput::Csv(PathBuf::from("x.csv")));

        let Commands::Predict(args) = parse(&["predict"]) else { panic!("expected predict") };
        assert_eq!(PredictConfig::from(&args).input, ScoringInput::Bronze(None));
    }

    #[test]
    fn test_history_curve_selection() {
        let Commands::History(args) = parse(&["history", "--model-version", "3"]) else {
            panic!("expected history")
        };
        assert_eq!(args.model_version, Some(VersionId(3)));
        assert_eq!(args.limit, None);

        let argv = ["churn-pipeline", "history", "--model-version", "3", "--limit", "2"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_bad_values_rejected_by_parser() {
        let argv = ["churn-pipeline", "run", "--unseen-policy", "guess"];
        assert!(Cli::try_parse_from(argv).is_err());
        let argv = ["churn-pipeline", "predict", "--csv", "a.csv", "--bronze-version", "1"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
