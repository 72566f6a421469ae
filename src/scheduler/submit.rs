use crate::error::Result;
use crate::scheduler::job::JobDescriptor;
use crate::scheduler::queue::WorkQueue;
use crate::store::JobStore;

/// Record a job as `pending` and hand it to the workers.
///
/// Resubmitting an id overwrites its `src`/`dst` and resets its retries. If
/// an earlier submission is executing, the new one is queued again by that
/// worker when its run ends.
pub async fn submit(store: &JobStore, queue: &WorkQueue, job: JobDescriptor) -> Result<()> {
    store.upsert(job.id, &job.src, &job.dst).await?;
    tracing::info!(job_id = job.id, src = %job.src, dst = %job.dst, "Job accepted");
    queue.push(job).await;
    Ok(())
}
