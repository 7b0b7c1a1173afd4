//! Watch-correlations CLI command.
//!
//! Builds an engine from the bundle, applies the correlation snapshot file
//! and then re-applies it on every change until interrupted.

use anyhow::{Context, Result};
use clap::Args;
use decision_core::{CorrelationWatcher, NoFeatures, SystemClock};
use decision_engine::DecisionEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::ConfigArgs;

/// Arguments for the watch-correlations command.
#[derive(Args, Debug, Clone)]
pub struct WatchCorrelationsArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// Correlation snapshot file (JSON)
    #[arg(long, env = "DECISION_CORRELATIONS", default_value = "config/correlations.json")]
    pub snapshot: PathBuf,
}

pub async fn run_watch_correlations(args: WatchCorrelationsArgs) -> Result<()> {
    let config = args.source.load()?;
    let max_age = config.exposure.max_correlation_age;
    let engine = Arc::new(DecisionEngine::new(
        config,
        Arc::new(NoFeatures),
        Arc::new(SystemClock),
    )?);

    let (watcher, rx) = CorrelationWatcher::new(&args.snapshot);
    if let Err(e) = watcher.reload() {
        warn!(
            path = %args.snapshot.display(),
            error = %e,
            "no usable correlation snapshot yet, exposure falls back to the conservative default"
        );
    }

    let mut updates = rx.clone();
    let listener = engine.spawn_correlation_listener(rx);
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let latest = updates.borrow_and_update().clone();
            if let Some(snapshot) = latest {
                let age = snapshot.age(chrono::Utc::now());
                info!(
                    as_of = %snapshot.as_of(),
                    age_secs = age.num_seconds(),
                    stale = age.to_std().is_ok_and(|a| a > max_age),
                    "correlation snapshot applied"
                );
            }
        }
    });

    info!(path = %args.snapshot.display(), "watching correlation snapshot");
    tokio::select! {
        result = watcher.watch() => result.context("correlation watcher stopped")?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    drop(watcher);
    listener.abort();
    reporter.abort();
    Ok(())
}
