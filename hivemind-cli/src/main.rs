//! hivemind: command line client for the Hivemind voting protocol
//!
//! Publishes issues, options and opinions to the configured CAS, extends
//! state chains and prints tallies. All output is JSON on stdout; logs go
//! to stderr.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info};

use hivemind_core::config::CasBackend;
use hivemind_core::{Cas, HivemindConfig};

use commands::Command;

#[derive(Parser)]
#[command(name = "hivemind")]
#[command(about = "Content-addressed Condorcet voting")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "HIVEMIND_CONFIG", default_value = "hivemind.toml")]
    config: PathBuf,

    /// CAS storage directory (overrides config file)
    #[arg(long, env = "HIVEMIND_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// CAS timeout in milliseconds (overrides config file)
    #[arg(long, env = "HIVEMIND_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Log level (overrides config file)
    #[arg(long, env = "HIVEMIND_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load or create default config
    let (mut config, from_file) = if cli.config.exists() {
        let content = std::fs::read_to_string(&cli.config)?;
        (HivemindConfig::from_toml(&content)?, true)
    } else {
        (HivemindConfig::default(), false)
    };

    // Apply CLI overrides
    if let Some(storage_dir) = cli.storage_dir {
        config.cas.storage_dir = storage_dir;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.cas.timeout_ms = timeout_ms;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("hivemind_core={}", config.logging.level).parse()?)
                .add_directive(format!("hivemind={}", config.logging.level).parse()?),
        )
        .init();

    if from_file {
        debug!(path = %cli.config.display(), "Loaded config");
    } else {
        debug!("Config file not found, using defaults");
    }
    if config.cas.backend == CasBackend::Memory {
        info!("Using in-memory CAS, nothing will be persisted");
    }

    let cas = Cas::from_config(&config.cas).await?;
    let output = commands::execute(cli.command, &cas).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
