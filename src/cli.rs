//! Command-line interface definitions for codeshield.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Local interception proxy with interactive allow/block decisions.
///
/// codeshield sits between an application and the network. Requests to known
/// targets are forwarded or rejected immediately; the first request to an
/// unknown target waits until you allow or block it, and the answer is
/// remembered.
#[derive(Parser, Debug)]
#[command(name = "codeshield")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to run the proxy).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(short = 'p', long = "port", value_name = "PORT", global = true)]
    pub port: Option<u16>,

    /// Address to listen on.
    #[arg(long = "listen", value_name = "ADDR", global = true)]
    pub listen: Option<String>,

    /// Policy file holding allowed and blocked targets.
    #[arg(long = "policy-file", value_name = "PATH", global = true)]
    pub policy_file: Option<PathBuf>,

    /// Seconds to wait for an answer before blocking (0 = wait forever).
    ///
    /// A timed-out request is blocked but the target is not remembered, so
    /// the next request asks again.
    #[arg(long = "prompt-timeout", value_name = "SECS", global = true)]
    pub prompt_timeout: Option<u64>,

    /// JSON settings file of the host application to point at the proxy.
    ///
    /// The proxy keys are written on start and removed on exit.
    #[arg(long = "settings-file", value_name = "PATH", global = true)]
    pub settings_file: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for codeshield.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the proxy (the default).
    Run,

    /// Inspect or edit the policy file.
    ///
    /// Changes are not picked up by a proxy that is already running.
    Policy {
        /// Policy operation.
        #[command(subcommand)]
        action: PolicyCommand,
    },
}

/// Offline policy operations.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum PolicyCommand {
    /// List allowed and blocked targets.
    List,

    /// Remove a target so the next request to it asks again.
    Forget {
        /// Target identifier exactly as listed.
        target: String,
    },

    /// Remove every target.
    Clear,
}
