//! Configuration schema definitions.
//!
//! This module defines the structure of the codeshield configuration files.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. System config: `/etc/codeshield/config.toml`
//! 2. User config: `~/.config/codeshield/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Every field is optional. Unset values fall back to the defaults exposed
//! by the accessor methods.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 47123;

/// Default product name shown in rejection bodies.
pub const DEFAULT_PRODUCT_NAME: &str = "CodeShield";

/// Default connection drain timeout in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Proxy listener and decision settings.
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Policy persistence settings.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Prompt settings.
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Host application integration.
    #[serde(default)]
    pub host: HostConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars (port, log_level, etc.) are overridden when set.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.proxy.merge(other.proxy);
        self.policy.merge(other.policy);
        self.prompt.merge(other.prompt);
        self.host.merge(other.host);
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxySettings {
    /// IP address to listen on. Empty means `127.0.0.1`.
    #[serde(default)]
    pub listen: String,

    /// Port to listen on. 0 means 47123.
    #[serde(default)]
    pub port: u16,

    /// Name shown in rejection bodies. Empty means `CodeShield`.
    #[serde(default)]
    pub product_name: String,

    /// Seconds to wait for a prompt answer. 0 = no timeout.
    #[serde(default)]
    pub prompt_timeout: u64,

    /// Seconds in-flight connections may run after shutdown. 0 means 5.
    #[serde(default)]
    pub drain_timeout: u64,
}

impl ProxySettings {
    fn merge(&mut self, other: ProxySettings) {
        // Scalars are overridden if non-default
        if !other.listen.is_empty() {
            self.listen = other.listen;
        }
        if other.port != 0 {
            self.port = other.port;
        }
        if !other.product_name.is_empty() {
            self.product_name = other.product_name;
        }
        if other.prompt_timeout != 0 {
            self.prompt_timeout = other.prompt_timeout;
        }
        if other.drain_timeout != 0 {
            self.drain_timeout = other.drain_timeout;
        }
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = if self.listen.is_empty() {
            DEFAULT_LISTEN
        } else {
            self.listen.as_str()
        };
        let ip: IpAddr = listen.parse().map_err(|_| ConfigError::InvalidValue {
            field: "proxy.listen".to_string(),
            message: format!("'{}' is not an IP address", listen),
        })?;
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };

        Ok(SocketAddr::new(ip, port))
    }

    /// Product name, falling back to the default.
    pub fn product_name(&self) -> &str {
        if self.product_name.is_empty() {
            DEFAULT_PRODUCT_NAME
        } else {
            &self.product_name
        }
    }

    /// Prompt timeout, or `None` to wait indefinitely.
    pub fn prompt_timeout(&self) -> Option<Duration> {
        (self.prompt_timeout > 0).then(|| Duration::from_secs(self.prompt_timeout))
    }

    /// Drain timeout for shutdown.
    pub fn drain_timeout(&self) -> Duration {
        let secs = if self.drain_timeout == 0 {
            DEFAULT_DRAIN_TIMEOUT_SECS
        } else {
            self.drain_timeout
        };
        Duration::from_secs(secs)
    }
}

/// Policy persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PolicyConfig {
    /// Policy file path. Unset means `~/.config/codeshield/policy.toml`.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl PolicyConfig {
    fn merge(&mut self, other: PolicyConfig) {
        if other.file.is_some() {
            self.file = other.file;
        }
    }
}

/// Prompt settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PromptConfig {
    /// External dialog command (`[program, args...]`). Empty = terminal.
    ///
    /// The question is appended as the last argument. Exit 0 allows, exit 1
    /// blocks.
    #[serde(default)]
    pub command: Vec<String>,
}

impl PromptConfig {
    fn merge(&mut self, other: PromptConfig) {
        // A command line is replaced as a whole, not appended
        if !other.command.is_empty() {
            self.command = other.command;
        }
    }
}

/// Host application integration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HostConfig {
    /// JSON settings file that receives the proxy address while running.
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
}

impl HostConfig {
    fn merge(&mut self, other: HostConfig) {
        if other.settings_file.is_some() {
            self.settings_file = other.settings_file;
        }
    }
}
