//! TOML policy file.
//!
//! The proxy's decisions survive restarts in a small TOML document:
//!
//! ```toml
//! [targets]
//! allowed = ["http://a.test/x"]
//! blocked = ["b.test:443"]
//! ```
//!
//! Writes go to a sibling temp file that is renamed over the existing one, so a
//! crash mid-write leaves the previous policy intact.

use super::error::ConfigError;
use super::loader::USER_CONFIG_DIR;
use crate::proxy::{PersistError, PolicyPersistence, PolicySnapshot, TargetId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Policy filename inside the user config directory.
pub const POLICY_FILE: &str = "policy.toml";

/// On-disk layout.
#[derive(Debug, Default, Deserialize, Serialize)]
struct PolicyDocument {
    #[serde(default)]
    targets: TargetLists,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct TargetLists {
    #[serde(default)]
    allowed: Vec<String>,
    #[serde(default)]
    blocked: Vec<String>,
}

/// Policy persistence backed by a TOML file.
#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
}

impl PolicyFile {
    /// Policy file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/codeshield/policy.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR).join(POLICY_FILE))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Get the path to the policy file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove `target` from both lists. Returns whether it was present.
    pub fn forget(&self, target: &str) -> Result<bool, PersistError> {
        let mut snapshot = self.load()?;
        let before = snapshot.len();
        snapshot.allowed.retain(|t| t.as_str() != target);
        snapshot.denied.retain(|t| t.as_str() != target);

        if snapshot.len() == before {
            return Ok(false);
        }
        self.save(&snapshot)?;
        debug!("Removed '{}' from policy", target);
        Ok(true)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, PersistError> {
        let removed = self.load()?.len();
        self.save(&PolicySnapshot::default())?;
        debug!("Cleared {} policy entries", removed);
        Ok(removed)
    }

    fn io_error(&self, source: io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| POLICY_FILE.to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

impl PolicyPersistence for PolicyFile {
    fn load(&self) -> Result<PolicySnapshot, PersistError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            // Missing policy is fine - start empty
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(PolicySnapshot::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let document: PolicyDocument =
            toml::from_str(&contents).map_err(|e| PersistError::Format {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        Ok(PolicySnapshot {
            allowed: to_targets(document.targets.allowed, &self.path),
            denied: to_targets(document.targets.blocked, &self.path),
        })
    }

    fn save(&self, snapshot: &PolicySnapshot) -> Result<(), PersistError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let document = PolicyDocument {
            targets: TargetLists {
                allowed: snapshot.allowed.iter().map(ToString::to_string).collect(),
                blocked: snapshot.denied.iter().map(ToString::to_string).collect(),
            },
        };
        let contents = toml::to_string_pretty(&document).map_err(|e| PersistError::Format {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let temp = self.temp_path();
        fs::write(&temp, contents).map_err(|e| self.io_error(e))?;
        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;

        debug!("Wrote policy to {:?}", self.path);
        Ok(())
    }
}

fn to_targets(entries: Vec<String>, path: &Path) -> Vec<TargetId> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let target = TargetId::new(entry);
            if target.is_none() {
                warn!("Skipping empty target in {:?}", path);
            }
            target
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn target(s: &str) -> TargetId {
        TargetId::new(s).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.toml"));

        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("nested").join("policy.toml"));
        let snapshot = PolicySnapshot {
            allowed: vec![target("http://a.test/x"), target("a.test:443")],
            denied: vec![target("http://b.test/y")],
        };

        file.save(&snapshot).unwrap();

        assert_eq!(file.load().unwrap(), snapshot);
        assert!(!file.temp_path().exists());
    }

    #[test]
    fn test_file_layout() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.toml"));
        let snapshot = PolicySnapshot {
            allowed: vec![target("http://a.test/x")],
            denied: vec![target("http://b.test/y")],
        };

        file.save(&snapshot).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();

        assert!(contents.contains("[targets]"));
        assert!(contents.contains("allowed"));
        assert!(contents.contains("blocked"));
        assert!(contents.contains("http://b.test/y"));
    }

    #[test]
    fn test_hand_written_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(
            &path,
            "[targets]\nallowed = [\"http://a.test/x\", \"\"]\n",
        )
        .unwrap();

        let snapshot = PolicyFile::new(path).load().unwrap();

        assert_eq!(snapshot.allowed, vec![target("http://a.test/x")]);
        assert!(snapshot.denied.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "this is not valid TOML [[[").unwrap();

        let result = PolicyFile::new(path).load();

        assert!(matches!(result, Err(PersistError::Format { .. })));
    }

    #[test]
    fn test_forget() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.toml"));
        file.save(&PolicySnapshot {
            allowed: vec![target("keep"), target("drop")],
            denied: vec![],
        })
        .unwrap();

        assert!(file.forget("drop").unwrap());
        assert!(!file.forget("drop").unwrap());
        assert_eq!(file.load().unwrap().allowed, vec![target("keep")]);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.toml"));
        file.save(&PolicySnapshot {
            allowed: vec![target("one")],
            denied: vec![target("two")],
        })
        .unwrap();

        assert_eq!(file.clear().unwrap(), 2);
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let file = PolicyFile::new("/var/lib/codeshield/policy.toml");
        assert_eq!(
            file.temp_path(),
            PathBuf::from("/var/lib/codeshield/.policy.toml.tmp")
        );
    }
}
