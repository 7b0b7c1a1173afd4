//! CLI commands for the decision engine.

pub mod evaluate;
pub mod validate_config;
pub mod watch_correlations;

pub use evaluate::{run_evaluate, EvaluateArgs};
pub use validate_config::{run_validate_config, ValidateConfigArgs};
pub use watch_correlations::{run_watch_correlations, WatchCorrelationsArgs};

use anyhow::{Context, Result};
use clap::Args;
use decision_core::{ConfigLoader, EngineConfig};
use std::path::PathBuf;

/// Where the configuration bundle comes from; shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration bundle (TOML)
    #[arg(short, long, env = "DECISION_CONFIG", default_value = "config/engine.toml")]
    pub config: PathBuf,

    /// Profile overlay, e.g. `production` reads `engine.production.toml`
    #[arg(long, env = "DECISION_PROFILE")]
    pub profile: Option<String>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<EngineConfig> {
        let loaded = match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(&self.config, profile),
            None => ConfigLoader::load(&self.config),
        };
        loaded.with_context(|| format!("loading {}", self.config.display()))
    }
}
