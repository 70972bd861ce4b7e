// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. clap parses the command
// line; all work is delegated to Layer 2 (application). This is
// the only layer that prints to stdout.
//
// Four commands are supported:
//   1. `run`      — full pipeline, registers a model
//   2. `generate` — new Bronze version only
//   3. `predict`  — score records with a registered model
//   4. `history`  — list registered models, or one model's
//                   training curve with --model-version
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenerateArgs, HistoryArgs, PredictArgs, RunArgs};

use crate::application::pipeline_use_case::PipelineReport;
use crate::domain::error::PipelineError;

#[derive(Parser, Debug)]
#[command(
    name = "churn-pipeline",
    version,
    about = "Leakage-safe churn pipeline: synthetic data → Bronze/Silver/Gold → classifier → registry."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Routes only, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args)      => run_pipeline(args),
            Commands::Generate(args) => run_generate(args),
            Commands::Predict(args)  => run_predict(args),
            Commands::History(args)  => run_history(args),
        }
    }
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    use crate::application::pipeline_use_case::PipelineUseCase;

    let use_case = PipelineUseCase::new(args.into())?;
    tracing::info!("Starting pipeline run (seed {})", use_case.config().seed);
    let report = use_case.execute().inspect_err(log_failing_partition)?;
    print_report(&report);
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    use crate::application::pipeline_use_case::PipelineUseCase;
    use crate::infra::store::LayeredStore;

    let use_case = PipelineUseCase::new(args.into())?;
    let store    = LayeredStore::open(&use_case.config().store_dir)?;
    let (version, raw) = use_case.ingest(&store).inspect_err(log_failing_partition)?;
    println!(
        "Bronze v{version:04}: {} records, {:.1}% churn",
        raw.len(),
        raw.churn_rate() * 100.0
    );
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let prediction = PredictUseCase::new((&args).into()).execute()?;
    let shown = args.limit.unwrap_or(prediction.scores.len());

    println!("Model {}", prediction.version);
    println!("{:<16} {:>8}", "customer_id", "p_churn");
    for s in prediction.scores.iter().take(shown) {
        println!("{:<16} {:>8.4}", s.customer_id, s.probability);
    }
    if shown < prediction.scores.len() {
        println!("... {} more", prediction.scores.len() - shown);
    }
    Ok(())
}

fn run_history(args: HistoryArgs) -> Result<()> {
    use crate::application::history_use_case::HistoryUseCase;

    let history = HistoryUseCase::new(&args.registry_dir);
    if let Some(version) = args.model_version {
        let curve = history.training_curve(version)?;
        println!("Model {version}");
        println!("{:>5} {:>10} {:>10}", "epoch", "loss", "accuracy");
        for m in &curve {
            println!("{:>5} {:>10.6} {:>10.4}", m.epoch, m.train_loss, m.train_accuracy);
        }
        return Ok(());
    }

    let entries = history.execute(args.limit)?;
    if entries.is_empty() {
        println!("No models registered in '{}'.", args.registry_dir.display());
        return Ok(());
    }

    println!(
        "{:<7} {:<20} {:>8} {:>8} {:>8} {:>5}  lineage (b/s/g)",
        "version", "registered", "accuracy", "f1", "auc", "feat"
    );
    for e in &entries {
        let auc = e.roc_auc.map_or_else(|| "-".to_string(), |a| format!("{a:.4}"));
        println!(
            "{:<7} {:<20} {:>8.4} {:>8.4} {:>8} {:>5}  {}/{}/{}",
            e.version.to_string(),
            e.registered_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            e.accuracy,
            e.f1,
            auc,
            e.n_features,
            e.lineage.bronze,
            e.lineage.silver,
            e.lineage.gold,
        );
    }
    Ok(())
}

/// Names the partition a failed check ran on, when the cause is ours.
fn log_failing_partition(err: &anyhow::Error) {
    let partition = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .and_then(PipelineError::partition);
    if let Some(partition) = partition {
        tracing::error!(%partition, "Check failed on the {partition} partition");
    }
}

fn print_report(r: &PipelineReport) {
    let m = &r.metrics;
    println!("\nRegistered model {}", r.model_version);
    println!(
        "  lineage:   bronze v{:04} → silver v{:04} → gold v{:04}",
        r.lineage.bronze, r.lineage.silver, r.lineage.gold
    );
    println!("  rows:      train {} (after SMOTE), test {}", r.train_rows, r.test_rows);
    println!("  features:  {} kept", r.features.len());
    println!("  threshold: {:.2}", m.threshold);
    println!("  accuracy:  {:.4}", m.accuracy);
    println!("  precision: {:.4}", m.precision);
    println!("  recall:    {:.4}", m.recall);
    println!("  f1:        {:.4}", m.f1);
    match m.roc_auc {
        Some(auc) => println!("  roc_auc:   {auc:.4}"),
        None      => println!("  roc_auc:   undefined (test partition has one class)"),
    }
    let [[tn, fp], [fn_, tp]] = m.confusion;
    println!("  confusion: [[tn {tn}, fp {fp}], [fn {fn_}, tp {tp}]]");
}
