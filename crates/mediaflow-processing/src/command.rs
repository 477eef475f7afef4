//! External command execution for ffmpeg and ffprobe.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured stdout of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
}

/// Runs an external program to completion.
///
/// Implementations must return an error for a non-zero exit status so callers never
/// inspect the output of a failed run.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Validate that a program path doesn't contain shell metacharacters
fn validate_program(program: &str) -> Result<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if program.is_empty() || program.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!("Invalid program path: {:?}", program));
    }
    Ok(())
}

/// Spawns real processes with a hard timeout. The child is killed when the timeout
/// fires or the calling future is dropped.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[tracing::instrument(skip(self, args), fields(process.executable.name = %program))]
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        validate_program(program)?;
        let start = std::time::Instant::now();

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", program, self.timeout))?
            .with_context(|| format!("Failed to execute {}", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(anyhow!(
                "{} exited with {}: {}",
                program,
                output.status,
                tail.trim()
            ));
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            "Command completed"
        );

        Ok(CommandOutput {
            stdout: output.stdout,
        })
    }
}
