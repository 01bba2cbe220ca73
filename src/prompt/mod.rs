//! Authorization prompts.
//!
//! A [`Prompter`] asks a human whether a target may be reached. The decision
//! broker calls it once per distinct unresolved target and waits for as long
//! as the answer takes.
//!
//! Two implementations ship with the proxy:
//! - [`TerminalPrompter`]: asks on the controlling terminal, one question at
//!   a time
//! - [`CommandPrompter`]: runs an external dialog command and reads its exit
//!   status

mod command;
mod terminal;

pub use command::CommandPrompter;
pub use terminal::TerminalPrompter;

use crate::proxy::TargetId;
use async_trait::async_trait;
use thiserror::Error;

/// Asks a human to allow or block a target.
#[async_trait]
pub trait Prompter: Send + Sync + 'static {
    /// Ask about `target`. `Ok(true)` allows, `Ok(false)` blocks.
    ///
    /// An error means no answer could be obtained; the caller decides whether
    /// to ask again.
    async fn ask(&self, target: &TargetId) -> Result<bool, PromptError>;

    /// The question about `target` went unanswered and was given up on.
    ///
    /// Called after the `ask` future has been dropped. The default does
    /// nothing.
    async fn expired(&self, _target: &TargetId) {}
}

/// Errors from prompt collaborators.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The prompt could not be shown or answered.
    #[error("Prompt unavailable: {0}")]
    Unavailable(String),

    /// I/O error talking to the prompt surface.
    #[error("Prompt I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Question shown to the user for `target`.
pub fn question(product_name: &str, target: &TargetId) -> String {
    format!(
        "{} intercepted a request to {}. Do you want to allow it?",
        product_name, target
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_names_target() {
        let target = TargetId::new("http://a.test/x").unwrap();
        let text = question("CodeShield", &target);
        assert!(text.starts_with("CodeShield"));
        assert!(text.contains("http://a.test/x"));
    }
}
