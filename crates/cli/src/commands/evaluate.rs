//! Evaluate CLI command.
//!
//! Reads a JSON array of signals, splits it across `--producers` tasks that
//! submit concurrently into one shared engine, and prints every decision in
//! input order together with the final engine snapshot.

use anyhow::{Context, Result};
use clap::Args;
use decision_core::{
    CorrelationSnapshot, FeatureSource, NoFeatures, Signal, StaticFeatures, SystemClock,
};
use decision_engine::{DecisionEngine, EngineSnapshot, Evaluation};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::ConfigArgs;

/// Arguments for the evaluate command.
#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// JSON file holding an array of signals
    #[arg(short, long)]
    pub signals: PathBuf,

    /// Number of concurrent producers sharing the engine
    #[arg(short, long, default_value = "4")]
    pub producers: usize,

    /// Optional JSON map of symbol -> feature snapshot
    #[arg(long)]
    pub features: Option<PathBuf>,

    /// Optional correlation snapshot applied before evaluation
    #[arg(long)]
    pub correlations: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    evaluations: Vec<Evaluation>,
    approved: usize,
    rejected: usize,
    snapshot: EngineSnapshot,
}

pub async fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let config = args.source.load()?;
    let signals = read_signals(&args.signals)?;
    let features: Arc<dyn FeatureSource> = match &args.features {
        Some(path) => Arc::new(read_features(path)?),
        None => Arc::new(NoFeatures),
    };

    let engine = Arc::new(DecisionEngine::new(config, features, Arc::new(SystemClock))?);
    if let Some(path) = &args.correlations {
        let snapshot = CorrelationSnapshot::load(path)
            .with_context(|| format!("reading {}", path.display()))?;
        engine.apply_correlations(Arc::new(snapshot))?;
    }

    let producers = args.producers.max(1);
    info!(
        signals = signals.len(),
        producers,
        "evaluating signal batch"
    );
    let evaluations = evaluate_concurrently(&engine, signals, producers).await?;

    let approved = evaluations
        .iter()
        .filter(|e| e.decision.is_approved())
        .count();
    let report = Report {
        approved,
        rejected: evaluations.len() - approved,
        evaluations,
        snapshot: engine.snapshot()?,
    };
    info!(
        approved = report.approved,
        rejected = report.rejected,
        "batch evaluated"
    );

    let out = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");
    Ok(())
}

/// Deals signals round-robin to `producers` blocking tasks and restores
/// input order afterwards. Conflicting signals dealt to different producers
/// still meet in the engine's arbitration round.
async fn evaluate_concurrently(
    engine: &Arc<DecisionEngine>,
    signals: Vec<Signal>,
    producers: usize,
) -> Result<Vec<Evaluation>> {
    let mut shares: Vec<Vec<(usize, Signal)>> = (0..producers).map(|_| Vec::new()).collect();
    for (index, signal) in signals.into_iter().enumerate() {
        shares[index % producers].push((index, signal));
    }

    let handles: Vec<_> = shares
        .into_iter()
        .filter(|share| !share.is_empty())
        .map(|share| {
            let engine = Arc::clone(engine);
            tokio::task::spawn_blocking(move || {
                let (indices, batch): (Vec<usize>, Vec<Signal>) = share.into_iter().unzip();
                indices
                    .into_iter()
                    .zip(engine.evaluate_batch(batch))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut evaluations = Vec::new();
    for handle in handles {
        evaluations.extend(handle.await.context("producer task failed")?);
    }
    evaluations.sort_by_key(|(index, _)| *index);
    Ok(evaluations.into_iter().map(|(_, e)| e).collect())
}

fn read_signals(path: &Path) -> Result<Vec<Signal>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing signals in {}", path.display()))
}

fn read_features(path: &Path) -> Result<StaticFeatures> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing features in {}", path.display()))
}
