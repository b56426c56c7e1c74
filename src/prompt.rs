//! Human input channel used for admin unlock and delete confirmation.

use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

#[async_trait]
pub trait HumanInput: Send + Sync {
    /// Ask for a line of input. `None` means the user cancelled.
    async fn prompt(&self, message: &str) -> Option<String>;

    async fn confirm(&self, message: &str) -> bool {
        let answer = self.prompt(&format!("{} [y/N]", message)).await;
        matches!(
            answer.as_deref().map(str::trim),
            Some("y") | Some("Y") | Some("yes")
        )
    }
}

/// Line-oriented input from the terminal. End of input counts as cancel.
///
/// The command loop reads through the same handle, so prompts and commands
/// never compete for a line.
pub struct StdinInput {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    pub async fn next_line(&self) -> Option<String> {
        match self.lines.lock().await.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                None
            }
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for StdinInput {
    async fn prompt(&self, message: &str) -> Option<String> {
        print!("{} ", message);
        std::io::stdout().flush().ok();
        self.next_line().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedInput;

    #[tokio::test]
    async fn test_confirm_accepts_yes_only() {
        let input = ScriptedInput::new(vec![Some("y"), Some(" yes "), Some("n"), Some(""), None]);
        assert!(input.confirm("Delete this topic?").await);
        assert!(input.confirm("Delete this topic?").await);
        assert!(!input.confirm("Delete this topic?").await);
        assert!(!input.confirm("Delete this topic?").await);
        assert!(!input.confirm("Delete this topic?").await);
        assert_eq!(input.prompts(), 5);
    }
}
