//! Validate-config CLI command.

use anyhow::Result;
use clap::Args;
use decision_core::EngineConfig;
use serde::Serialize;

use super::ConfigArgs;

/// Arguments for the validate-config command.
#[derive(Args, Debug, Clone)]
pub struct ValidateConfigArgs {
    #[command(flatten)]
    pub source: ConfigArgs,

    /// Print the fully resolved bundle as JSON
    #[arg(long)]
    pub print: bool,
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    version: &'a str,
    instruments: usize,
    strategies: usize,
    min_quality_score: f64,
    risk_band: (String, String),
    buffer: String,
    lock_timeout_ms: u64,
}

impl<'a> Summary<'a> {
    fn of(config: &'a EngineConfig) -> Self {
        Self {
            version: &config.version,
            instruments: config.instruments.len(),
            strategies: config.governance.strategies.len(),
            min_quality_score: config.sizing.min_quality_score,
            risk_band: (
                config.sizing.min_risk_pct.to_string(),
                config.sizing.max_risk_pct.to_string(),
            ),
            buffer: config.exposure.buffer.to_string(),
            lock_timeout_ms: u64::try_from(config.locks.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

pub fn run_validate_config(args: &ValidateConfigArgs) -> Result<()> {
    let config = args.source.load()?;
    if args.print {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&Summary::of(&config))?);
    }
    Ok(())
}
