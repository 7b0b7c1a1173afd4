use clap::{Parser, Subcommand};

mod commands;

use commands::{EvaluateArgs, ValidateConfigArgs, WatchCorrelationsArgs};

#[derive(Parser)]
#[command(name = "decision-engine")]
#[command(about = "Risk and arbitration core for concurrent signal producers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration bundle
    ValidateConfig(ValidateConfigArgs),
    /// Evaluate a JSON batch of signals with concurrent producers
    Evaluate(EvaluateArgs),
    /// Follow a correlation snapshot file and apply every reload
    WatchCorrelations(WatchCorrelationsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Decisions go to stdout, so logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::ValidateConfig(args) => commands::run_validate_config(&args)?,
        Commands::Evaluate(args) => commands::run_evaluate(args).await?,
        Commands::WatchCorrelations(args) => commands::run_watch_correlations(args).await?,
    }

    Ok(())
}
