//! Host application proxy settings.
//!
//! Points the host application at the proxy by editing its JSON settings
//! file while the proxy runs:
//!
//! ```json
//! {
//!   "http.proxy": "http://127.0.0.1:47123",
//!   "http.proxyStrictSSL": false,
//!   "http.proxySupport": "override"
//! }
//! ```
//!
//! Other keys are left alone. On shutdown the three keys are removed again.

use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const PROXY_KEY: &str = "http.proxy";
const STRICT_SSL_KEY: &str = "http.proxyStrictSSL";
const PROXY_SUPPORT_KEY: &str = "http.proxySupport";

/// Errors from editing the settings file.
#[derive(Debug, Error)]
pub enum HostError {
    /// Reading or writing the settings file failed.
    #[error("Settings file I/O error on {path}: {source}")]
    Io {
        /// Path of the settings file.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        /// Path of the settings file.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The settings file holds something other than a JSON object.
    #[error("Settings file {0} is not a JSON object")]
    NotAnObject(PathBuf),
}

/// Proxy keys in a host application's JSON settings file.
#[derive(Debug, Clone)]
pub struct HostSettings {
    path: PathBuf,
}

impl HostSettings {
    /// Settings file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the path to the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Route the host application through the proxy at `addr`.
    ///
    /// Creates the file if it does not exist.
    pub fn apply(&self, addr: SocketAddr) -> Result<(), HostError> {
        let mut settings = self.read()?.unwrap_or_default();
        let proxy_url = format!("http://{}", addr);

        settings.insert(PROXY_KEY.to_string(), Value::String(proxy_url.clone()));
        settings.insert(STRICT_SSL_KEY.to_string(), Value::Bool(false));
        settings.insert(
            PROXY_SUPPORT_KEY.to_string(),
            Value::String("override".to_string()),
        );

        self.write(&settings)?;
        info!("Pointed {:?} at {}", self.path, proxy_url);
        Ok(())
    }

    /// Remove the proxy keys. Returns whether the file changed.
    pub fn clear(&self) -> Result<bool, HostError> {
        let Some(mut settings) = self.read()? else {
            return Ok(false);
        };

        let mut changed = false;
        for key in [PROXY_KEY, STRICT_SSL_KEY, PROXY_SUPPORT_KEY] {
            changed |= settings.remove(key).is_some();
        }

        if changed {
            self.write(&settings)?;
            debug!("Removed proxy settings from {:?}", self.path);
        }
        Ok(changed)
    }

    /// Read the settings object, or `None` if the file does not exist.
    fn read(&self) -> Result<Option<Map<String, Value>>, HostError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HostError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(Some(Map::new()));
        }

        let value: Value = serde_json::from_str(&contents).map_err(|e| HostError::Parse {
            path: self.path.clone(),
            source: e,
        })?;

        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(HostError::NotAnObject(self.path.clone())),
        }
    }

    fn write(&self, settings: &Map<String, Value>) -> Result<(), HostError> {
        let io_error = |source| HostError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut contents = serde_json::to_string_pretty(settings).map_err(|e| HostError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        contents.push('\n');

        fs::write(&self.path, contents).map_err(io_error)
    }
}
