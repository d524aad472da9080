//! The executable seam between the queue and the work it carries.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::job::JobRecord;

/// The body of work a job performs.
///
/// Implementations are opaque to the queue: the dispatcher hands over the
/// claimed record, and the returned result is the only signal it acts on.
/// An `Err` leaves the record in `in-flight` for the sweeper to retry or
/// discard.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Executes the job body for `job`.
    async fn execute(&self, job: &JobRecord) -> anyhow::Result<()>;
}

/// Payload shape understood by [`CommandHandler`].
#[derive(Debug, Deserialize)]
struct CommandPayload {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Handler that runs the job payload as a subprocess.
///
/// Expects a payload of the form `{"command": "...", "args": [...]}`.
/// A non-zero exit status or a run past `job_timeout` counts as failure.
pub struct CommandHandler {
    job_timeout: Duration,
}

impl CommandHandler {
    /// Creates a handler with the given per-job timeout.
    pub fn new(job_timeout: Duration) -> Self {
        Self { job_timeout }
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn execute(&self, job: &JobRecord) -> anyhow::Result<()> {
        let spec: CommandPayload = serde_json::from_value(job.payload.clone())
            .context("job payload is not a command spec")?;

        debug!(job_id = %job.id, command = %spec.command, "running job command");

        let output = tokio::time::timeout(
            self.job_timeout,
            tokio::process::Command::new(&spec.command)
                .args(&spec.args)
                .output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("command timed out after {:?}", self.job_timeout))?
        .with_context(|| format!("failed to spawn '{}'", spec.command))?;

        if !output.status.success() {
            bail!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_job(command: &str, args: &[&str]) -> JobRecord {
        JobRecord::new(
            "shell",
            serde_json::json!({ "command": command, "args": args }),
        )
    }

    #[tokio::test]
    async fn test_successful_command() {
        let handler = CommandHandler::new(Duration::from_secs(5));
        let job = command_job("true", &[]);

        assert!(handler.execute(&job).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command() {
        let handler = CommandHandler::new(Duration::from_secs(5));
        let job = command_job("false", &[]);

        assert!(handler.execute(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_failure() {
        let handler = CommandHandler::new(Duration::from_secs(5));
        let job = JobRecord::new("bad", serde_json::json!({"not": "a command"}));

        assert!(handler.execute(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let handler = CommandHandler::new(Duration::from_millis(50));
        let job = command_job("sleep", &["5"]);

        let err = handler.execute(&job).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
