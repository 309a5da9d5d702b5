//! Interactive confirmation before destructive actions

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::Result;

/// Asks the operator to approve an action
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Confirm: Send + Sync {
    /// Show `prompt` and return true only for an explicit yes
    async fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Reads the answer from stdin; `y` and `yes` (any case) approve
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(format!("{prompt} [y/N]: ").as_bytes()).await?;
        stdout.flush().await?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(is_yes(&line))
    }
}

pub(crate) fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
