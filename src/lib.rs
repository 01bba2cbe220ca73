//! codeshield: local interception proxy with interactive allow/block decisions
//!
//! This crate provides a forward HTTP proxy that classifies every outbound
//! request against a persistent allow/deny policy and asks a human about
//! targets it has never seen.
//!
//! # Security Model
//!
//! The proxy is **fail-closed** where no human decided: a prompt that times
//! out blocks the request. Only explicit answers are remembered.
//!
//! # Architecture
//!
//! - **Proxy**: intercepting server, policy store, decision broker, forwarder
//! - **Prompt**: terminal and external-command prompters
//! - **Config**: hierarchical TOML configuration and the TOML policy file
//! - **Host**: points the host application's settings at the proxy
//! - **Telemetry**: structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod host;
pub mod orchestrator;
pub mod prompt;
pub mod proxy;
pub mod telemetry;
