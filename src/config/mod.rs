//! Configuration system for codeshield.
//!
//! This module provides TOML configuration loading with hierarchy merging,
//! plus the TOML policy file the proxy persists its decisions to.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/codeshield/config.toml`
//! 2. User config: `~/.config/codeshield/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! No configuration file is required; every setting has a default.
//!
//! # Example
//!
//! ```toml
//! [proxy]
//! port = 47123
//! prompt_timeout = 0
//!
//! [prompt]
//! command = ["zenity", "--question", "--text"]
//!
//! [host]
//! settings_file = "/home/me/.config/Code/User/settings.json"
//! ```

mod error;
mod loader;
mod policy_file;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use policy_file::PolicyFile;
pub use schema::{Config, GeneralConfig, HostConfig, PolicyConfig, PromptConfig, ProxySettings};
