//! Subcommand handling for codeshield.
//!
//! This module handles the offline `policy` subcommands. They edit the policy
//! file directly; a running proxy does not see the change until it restarts.

use anyhow::{Context, Result};
use std::io::Write;

use crate::cli::PolicyCommand;
use crate::config::PolicyFile;
use crate::proxy::PolicyPersistence;

/// Handle a `policy` subcommand, printing results to stdout.
pub fn handle_policy_command(action: &PolicyCommand, policy_file: &PolicyFile) -> Result<()> {
    let stdout = std::io::stdout();
    run_policy_command(action, policy_file, &mut stdout.lock())
}

fn run_policy_command(
    action: &PolicyCommand,
    policy_file: &PolicyFile,
    out: &mut impl Write,
) -> Result<()> {
    match action {
        PolicyCommand::List => {
            let snapshot = policy_file
                .load()
                .with_context(|| format!("Failed to read {:?}", policy_file.path()))?;

            writeln!(out, "Policy file: {}", policy_file.path().display())?;
            if snapshot.is_empty() {
                writeln!(out, "No targets recorded.")?;
                return Ok(());
            }

            writeln!(out, "Allowed ({}):", snapshot.allowed.len())?;
            for target in &snapshot.allowed {
                writeln!(out, "  {}", target)?;
            }
            writeln!(out, "Blocked ({}):", snapshot.denied.len())?;
            for target in &snapshot.denied {
                writeln!(out, "  {}", target)?;
            }
        }
        PolicyCommand::Forget { target } => {
            let removed = policy_file
                .forget(target)
                .with_context(|| format!("Failed to update {:?}", policy_file.path()))?;

            if removed {
                writeln!(out, "Forgot {}", target)?;
            } else {
                writeln!(out, "{} is not in the policy", target)?;
            }
        }
        PolicyCommand::Clear => {
            let removed = policy_file
                .clear()
                .with_context(|| format!("Failed to update {:?}", policy_file.path()))?;
            writeln!(out, "Removed {} target(s)", removed)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{PolicySnapshot, TargetId};
    use tempfile::tempdir;

    fn seeded_file(dir: &std::path::Path) -> PolicyFile {
        let file = PolicyFile::new(dir.join("policy.toml"));
        file.save(&PolicySnapshot {
            allowed: vec![TargetId::new("http://a.test/x").unwrap()],
            denied: vec![TargetId::new("http://b.test/y").unwrap()],
        })
        .unwrap();
        file
    }

    fn run(action: PolicyCommand, file: &PolicyFile) -> String {
        let mut out = Vec::new();
        run_policy_command(&action, file, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_list() {
        let dir = tempdir().unwrap();
        let file = seeded_file(dir.path());

        let output = run(PolicyCommand::List, &file);

        assert!(output.contains("Allowed (1):\n  http://a.test/x"));
        assert!(output.contains("Blocked (1):\n  http://b.test/y"));
    }

    #[test]
    fn test_list_empty() {
        let dir = tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.toml"));

        assert!(run(PolicyCommand::List, &file).contains("No targets recorded."));
    }

    #[test]
    fn test_forget() {
        let dir = tempdir().unwrap();
        let file = seeded_file(dir.path());

        let output = run(
            PolicyCommand::Forget {
                target: "http://b.test/y".to_string(),
            },
            &file,
        );

        assert_eq!(output, "Forgot http://b.test/y\n");
        assert!(file.load().unwrap().denied.is_empty());
    }

    #[test]
    fn test_forget_unknown() {
        let dir = tempdir().unwrap();
        let file = seeded_file(dir.path());

        let output = run(
            PolicyCommand::Forget {
                target: "http://c.test/".to_string(),
            },
            &file,
        );

        assert!(output.contains("is not in the policy"));
        assert_eq!(file.load().unwrap().len(), 2);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let file = seeded_file(dir.path());

        assert_eq!(run(PolicyCommand::Clear, &file), "Removed 2 target(s)\n");
        assert!(file.load().unwrap().is_empty());
    }
}
