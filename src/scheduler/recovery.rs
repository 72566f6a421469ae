use serde::Serialize;

use crate::error::Result;
use crate::scheduler::job::JobStatus;
use crate::scheduler::queue::WorkQueue;
use crate::store::JobStore;

/// What startup recovery does with records left `running` by a previous process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Leave them `running` and report them; an operator decides.
    #[default]
    LeaveRunning,
    /// Reset them to `pending` and enqueue them. The transfer may run twice.
    Requeue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Ids pushed onto the queue, in push order.
    pub requeued: Vec<i64>,
    /// Ids still `running` that were not touched.
    pub stuck_running: Vec<i64>,
}

/// Load every job that was accepted but never picked up back onto `queue`.
///
/// Must run before the submission endpoint accepts requests. `pending` and
/// `retrying` records are enqueued once each: all pending jobs by id, then
/// the retrying ones by id.
pub async fn recover(
    store: &JobStore,
    queue: &WorkQueue,
    policy: RecoveryPolicy,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for status in [JobStatus::Pending, JobStatus::Retrying] {
        for job in store.query_by_status(status).await? {
            queue.push(job.descriptor()).await;
            report.requeued.push(job.id);
        }
    }

    let running = store.query_by_status(JobStatus::Running).await?;
    for job in running {
        match policy {
            RecoveryPolicy::LeaveRunning => {
                tracing::warn!(
                    job_id = job.id,
                    "Job was running when the previous process stopped; leaving it for manual review"
                );
                report.stuck_running.push(job.id);
            }
            RecoveryPolicy::Requeue => {
                if store
                    .transition(job.id, &[JobStatus::Running], JobStatus::Pending, None)
                    .await?
                {
                    tracing::warn!(job_id = job.id, "Requeueing job interrupted while running");
                    queue.push(job.descriptor()).await;
                    report.requeued.push(job.id);
                }
            }
        }
    }

    tracing::info!(
        requeued = report.requeued.len(),
        stuck_running = report.stuck_running.len(),
        "Startup recovery finished"
    );
    Ok(report)
}
