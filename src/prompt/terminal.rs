//! Terminal prompter.

use super::{PromptError, Prompter, question};
use crate::proxy::TargetId;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Asks on stderr and reads answers from stdin.
///
/// Questions for different targets are serialized: the terminal can only
/// hold one conversation at a time, so later prompts wait their turn.
///
/// A question can be given up on while the user is still reading it. Any
/// answer typed for it afterwards is thrown away before the next question is
/// shown, so it can never be taken as the answer about another target.
pub struct TerminalPrompter {
    product_name: String,
    terminal: Mutex<Terminal>,
}

struct Terminal {
    input: Input,
    output: Output,
    /// A question was left without an answer; input waiting now belongs to it.
    stale: bool,
}

impl TerminalPrompter {
    /// Prompter on the process's stdin and stderr.
    pub fn new(product_name: impl Into<String>) -> Self {
        Self::with_io(
            product_name,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stderr(),
        )
    }

    /// Prompter on arbitrary streams.
    pub fn with_io(
        product_name: impl Into<String>,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            terminal: Mutex::new(Terminal {
                input: Box::new(input),
                output: Box::new(output),
                stale: false,
            }),
        }
    }
}

impl Terminal {
    /// Drop whatever input is ready right now without waiting for more.
    async fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        loop {
            let ready = match tokio::time::timeout(Duration::ZERO, self.input.fill_buf()).await {
                Ok(Ok(buf)) => buf.len(),
                _ => 0,
            };
            if ready == 0 {
                return discarded;
            }
            self.input.consume(ready);
            discarded += ready;
        }
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn ask(&self, target: &TargetId) -> Result<bool, PromptError> {
        let mut terminal = self.terminal.lock().await;

        if terminal.stale {
            let discarded = terminal.discard_pending().await;
            if discarded > 0 {
                debug!("Discarded {} byte(s) of late input", discarded);
            }
            terminal.stale = false;
        }

        loop {
            let prompt = format!(
                "\n{}\n  [a] Allow  [b] Block\n> ",
                question(&self.product_name, target)
            );
            terminal.output.write_all(prompt.as_bytes()).await?;
            terminal.output.flush().await?;

            // Stays set if this future is dropped while waiting for the line.
            terminal.stale = true;
            let mut line = String::new();
            let read = terminal.input.read_line(&mut line).await?;
            terminal.stale = false;

            if read == 0 {
                return Err(PromptError::Unavailable("terminal input closed".into()));
            }

            match parse_answer(&line) {
                Some(allowed) => {
                    debug!("Terminal answer for {}: {}", target, allowed);
                    return Ok(allowed);
                }
                None => {
                    terminal
                        .output
                        .write_all(b"Please answer 'a' (allow) or 'b' (block).\n")
                        .await?;
                }
            }
        }
    }

    async fn expired(&self, target: &TargetId) {
        // Busy means another question is on screen; it already dropped
        // anything typed for this one.
        let Ok(mut terminal) = self.terminal.try_lock() else {
            return;
        };

        terminal.stale = true;
        let notice = format!("\nNo answer for {}; blocked.\n", target);
        if let Err(e) = terminal.output.write_all(notice.as_bytes()).await {
            debug!("Failed to write expiry notice: {}", e);
            return;
        }
        let _ = terminal.output.flush().await;
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_lowercase().as_str() {
        "a" | "allow" | "y" | "yes" => Some(true),
        "b" | "block" | "n" | "no" => Some(false),
        _ => None,
    }
}
