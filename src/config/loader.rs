//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Defaults (all fields unset)
//! 2. System config: `/etc/codeshield/config.toml`
//! 3. User config: `~/.config/codeshield/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! Scalars (port, log_level) are **overridden** when set.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::policy_file::PolicyFile;
use super::schema::Config;
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/codeshield/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "codeshield";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    ///
    /// Missing system and user config files are not errors - they are simply
    /// skipped. A missing `--config` file and invalid TOML are errors.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        // Load and merge system config
        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        // Load and merge user config
        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        // Load and merge additional config file from CLI
        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        apply_cli_flags(&mut config, cli);
        Ok(config)
    }

    /// Policy file named by the config, or the default one.
    pub fn policy_file(&self, config: &Config) -> Result<PolicyFile, ConfigError> {
        let path = match config.policy.file {
            Some(ref path) => path.clone(),
            None => PolicyFile::default_path()?,
        };
        Ok(PolicyFile::new(path))
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// CLI flags win over every file. An explicit `--prompt-timeout 0` turns a
/// configured timeout off.
fn apply_cli_flags(config: &mut Config, cli: &Cli) {
    if let Some(ref listen) = cli.listen {
        config.proxy.listen = listen.clone();
    }
    if let Some(port) = cli.port {
        config.proxy.port = port;
    }
    if let Some(timeout) = cli.prompt_timeout {
        config.proxy.prompt_timeout = timeout;
    }
    if let Some(ref path) = cli.policy_file {
        config.policy.file = Some(path.clone());
    }
    if let Some(ref path) = cli.settings_file {
        config.host.settings_file = Some(path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;
    use tempfile::tempdir;

    fn create_test_cli(args: &[&str]) -> Cli {
        let mut argv = vec!["codeshield"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    fn loader_in(dir: &Path) -> ConfigLoader {
        ConfigLoader::with_paths(dir.join("system.toml"), dir.join("user.toml"))
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.proxy.listen_addr().unwrap().port(), 47123);
        assert_eq!(config.proxy.product_name(), "CodeShield");
        assert!(config.proxy.prompt_timeout().is_none());
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "[proxy]\nport = 3128\n").unwrap();
        fs::write(dir.path().join("user.toml"), "[proxy]\nport = 8888\n").unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.proxy.port, 8888);
    }

    #[test]
    fn test_system_values_survive_unset_user_values() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[proxy]\nproduct_name = \"Acme Guard\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("user.toml"), "[general]\nlog_level = \"debug\"\n").unwrap();

        let config = loader_in(dir.path()).load(&create_test_cli(&[])).unwrap();

        assert_eq!(config.proxy.product_name(), "Acme Guard");
        assert_eq!(config.general.log_level, "debug");
    }

    #[test]
    fn test_cli_config_file_merged_last() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[proxy]\nport = 8888\n").unwrap();
        let extra = dir.path().join("extra.toml");
        fs::write(&extra, "[proxy]\nport = 9999\n").unwrap();

        let cli = create_test_cli(&["-c", extra.to_str().unwrap()]);
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.proxy.port, 9999);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");

        let cli = create_test_cli(&["--config", missing.to_str().unwrap()]);
        let result = loader_in(dir.path()).load(&cli);

        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_cli_flags_override_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            "[proxy]\nport = 8888\nprompt_timeout = 30\n",
        )
        .unwrap();

        let cli = create_test_cli(&[
            "-p",
            "7000",
            "--listen",
            "0.0.0.0",
            "--prompt-timeout",
            "0",
            "--policy-file",
            "/tmp/p.toml",
            "--settings-file",
            "/tmp/s.json",
        ]);
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(
            config.proxy.listen_addr().unwrap(),
            "0.0.0.0:7000".parse::<std::net::SocketAddr>().unwrap()
        );
        assert_eq!(config.proxy.prompt_timeout(), None);
        assert_eq!(config.policy.file, Some(PathBuf::from("/tmp/p.toml")));
        assert_eq!(config.host.settings_file, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn test_cli_prompt_timeout() {
        let dir = tempdir().unwrap();
        let cli = create_test_cli(&["--prompt-timeout", "15"]);
        let config = loader_in(dir.path()).load(&cli).unwrap();

        assert_eq!(config.proxy.prompt_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("system.toml"), "this is not valid TOML [[[").unwrap();

        let result = loader_in(dir.path()).load(&create_test_cli(&[]));

        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_policy_file_from_config() {
        let dir = tempdir().unwrap();
        let loader = loader_in(dir.path());
        let cli = create_test_cli(&["--policy-file", "/srv/codeshield/policy.toml"]);
        let config = loader.load(&cli).unwrap();

        let file = loader.policy_file(&config).unwrap();

        assert_eq!(file.path(), Path::new("/srv/codeshield/policy.toml"));
    }
}
