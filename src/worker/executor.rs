use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::ExecutorConfig;
use crate::scheduler::JobDescriptor;

/// How a single invocation of the transfer executable ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Exited with code 0.
    Succeeded,
    /// Exited non-zero. `exit_code` is `None` when killed by a signal.
    Failed { exit_code: Option<i32> },
    /// Still running when the configured timeout elapsed; the process was killed.
    TimedOut { after: Duration },
    /// The process could not be started at all.
    SpawnFailed { error: std::io::Error },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded)
    }

    /// Short label used in logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::TimedOut { .. } => "timed_out",
            ExecutionOutcome::SpawnFailed { .. } => "spawn_failed",
        }
    }
}

/// Runs the external transfer executable for a job.
///
/// The command line is `program [args...] <id> <src> <dst>`. Output is not
/// captured: stdout and stderr go wherever the daemon's own streams go.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
    config: ExecutorConfig,
}

impl TransferExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self, job: &JobDescriptor) -> ExecutionOutcome {
        tracing::info!(
            job_id = job.id,
            src = %job.src,
            dst = %job.dst,
            program = %self.config.program.display(),
            "Executing transfer"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .arg(job.id.to_string())
            .arg(&job.src)
            .arg(&job.dst)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                tracing::error!(job_id = job.id, error = %error, "Failed to start transfer");
                return ExecutionOutcome::SpawnFailed { error };
            }
        };

        let status = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(job_id = job.id, error = %e, "Failed to kill timed out transfer");
                    }
                    tracing::warn!(
                        job_id = job.id,
                        timeout_ms = limit.as_millis() as u64,
                        "Transfer timed out"
                    );
                    return ExecutionOutcome::TimedOut { after: limit };
                }
            },
            None => child.wait().await,
        };

        match status {
            Ok(status) if status.success() => {
                tracing::info!(job_id = job.id, "Transfer completed");
                ExecutionOutcome::Succeeded
            }
            Ok(status) => {
                let exit_code = status.code();
                tracing::info!(job_id = job.id, exit_code = ?exit_code, "Transfer failed");
                ExecutionOutcome::Failed { exit_code }
            }
            Err(error) => {
                tracing::error!(job_id = job.id, error = %error, "Waiting on transfer failed");
                ExecutionOutcome::SpawnFailed { error }
            }
        }
    }
}
