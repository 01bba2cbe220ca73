//! External command prompter.
//!
//! Runs a dialog program with the question appended as its last argument,
//! for example `zenity --question --text` or a custom script. The exit status
//! is the answer:
//!
//! | exit status | answer |
//! |-------------|--------|
//! | 0           | allow  |
//! | 1           | block  |
//! | other       | unavailable (asked again later) |

use super::{PromptError, Prompter, question};
use crate::proxy::TargetId;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Prompter backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandPrompter {
    product_name: String,
    program: String,
    args: Vec<String>,
}

impl CommandPrompter {
    /// Build a prompter from a command line (`[program, args...]`).
    ///
    /// Returns `None` for an empty command line.
    pub fn new(product_name: impl Into<String>, command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            product_name: product_name.into(),
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Prompter for CommandPrompter {
    async fn ask(&self, target: &TargetId) -> Result<bool, PromptError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(question(&self.product_name, target))
            .env("CODESHIELD_TARGET", target.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                PromptError::Unavailable(format!("failed to run {}: {}", self.program, e))
            })?;

        debug!("Prompt command for {} exited with {}", target, status);

        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(PromptError::Unavailable(format!(
                "{} exited with {}",
                self.program, status
            ))),
        }
    }
}
