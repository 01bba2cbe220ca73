//! codeshield: local interception proxy with interactive allow/block decisions
//!
//! This is the main entry point for the codeshield binary. It handles CLI
//! argument parsing, configuration loading and logging setup, then either
//! runs the proxy or a `policy` subcommand.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: Goes to syslog, one JSON event per allow, block and
//!   prompt outcome
//! - **Debug logging**: stderr, filtered by `-v`, `RUST_LOG` or
//!   `general.log_level`
//! - **Prompts**: stderr/stdin with the terminal prompter, or an external
//!   dialog command

use anyhow::{Context, Result};
use clap::Parser;
use codeshield::{
    cli::{Cli, Commands},
    cli_handler,
    config::ConfigLoader,
    orchestrator,
};
use tracing::debug;

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Load configuration with hierarchy merging
    let config_loader = ConfigLoader::new();
    let config = config_loader
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    match cli.command {
        Some(Commands::Policy { ref action }) => {
            let policy_file = config_loader
                .policy_file(&config)
                .context("Failed to locate policy file")?;
            cli_handler::handle_policy_command(action, &policy_file)
        }
        Some(Commands::Run) | None => orchestrator::run_proxy(&config, &config_loader),
    }
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else `general.log_level`, else warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if log_level.is_empty() {
                EnvFilter::new("warn")
            } else {
                EnvFilter::new(log_level)
            }
        }),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
