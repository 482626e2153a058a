//! The human in the loop: prompts that block until the operator presses Enter.

use anyhow::Context;
use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

#[async_trait]
pub trait Operator: Send + Sync {
    /// Show `prompt` and wait for acknowledgement.
    async fn confirm(&self, prompt: &str) -> anyhow::Result<()>;
}

/// Reads acknowledgements from stdin.
pub struct StdinOperator {
    reader: Mutex<BufReader<Stdin>>,
}

impl StdinOperator {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

#[async_trait]
impl Operator for StdinOperator {
    async fn confirm(&self, prompt: &str) -> anyhow::Result<()> {
        {
            let mut stdout = std::io::stdout().lock();
            write!(stdout, "\n{} ", prompt).context("write prompt")?;
            stdout.flush().context("flush prompt")?;
        }
        let mut line = String::new();
        let n = self
            .reader
            .lock()
            .await
            .read_line(&mut line)
            .await
            .context("read from stdin")?;
        if n == 0 {
            anyhow::bail!("stdin closed while waiting for the operator");
        }
        Ok(())
    }
}
