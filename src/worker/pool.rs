use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::scheduler::{JobDescriptor, WorkQueue};
use crate::store::{JobStore, StoreRetry};
use crate::worker::executor::{ExecutionOutcome, TransferExecutor};
use crate::worker::heartbeat::WorkerRegistry;
use crate::worker::stats::PoolStats;

/// Handles every worker in the pool shares.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub store: JobStore,
    pub queue: WorkQueue,
    pub executor: TransferExecutor,
    pub registry: WorkerRegistry,
    pub stats: PoolStats,
    pub store_retry: StoreRetry,
    pub dequeue_timeout: Duration,
}

/// One consumer of the work queue.
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Consume the queue until `shutdown` is cancelled.
    ///
    /// A job already executing is allowed to finish. A store error that
    /// survives the retry budget ends the loop with that error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.ctx.registry.register(self.id).await;
        tracing::info!(worker_id = self.id, "Worker started");

        let result = loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                job = self.ctx.queue.dequeue(self.ctx.dequeue_timeout) => job,
            };

            match job {
                Some(job) => {
                    if let Err(e) = self.process(job).await {
                        break Err(e);
                    }
                }
                None => {
                    tracing::trace!(worker_id = self.id, "Idle");
                    self.ctx.registry.heartbeat(self.id).await;
                }
            }
        };

        self.ctx.registry.deregister(self.id).await;
        match &result {
            Ok(()) => tracing::info!(worker_id = self.id, "Worker stopped"),
            Err(e) => tracing::error!(worker_id = self.id, error = %e, "Worker aborted"),
        }
        result
    }

    /// Dequeue at most one job, waiting up to `timeout`, and process it.
    pub async fn run_once(&self, timeout: Duration) -> Result<Option<ExecutionOutcome>> {
        match self.ctx.queue.dequeue(timeout).await {
            Some(job) => self.process(job).await,
            None => Ok(None),
        }
    }

    /// Claim, execute and record the result of one job.
    ///
    /// Returns `None` when the descriptor was stale: the record is gone, or is
    /// in a state no worker may claim from.
    pub async fn process(&self, job: JobDescriptor) -> Result<Option<ExecutionOutcome>> {
        let store = &self.ctx.store;
        let id = job.id;

        let claimed = self.ctx.store_retry.run("claim", move || store.claim(id)).await?;
        let Some(record) = claimed else {
            tracing::debug!(worker_id = self.id, job_id = id, "Skipping stale queue entry");
            self.ctx.stats.record_stale();
            return Ok(None);
        };

        let generation = record.generation;
        tracing::info!(
            worker_id = self.id,
            job_id = id,
            retries = record.retries,
            generation,
            "Start job"
        );
        self.ctx.registry.job_started(self.id, id).await;

        // The record, not the queue entry, holds the latest src/dst.
        let outcome = self.ctx.executor.execute(&record.descriptor()).await;
        self.ctx.stats.record(&outcome);

        let settled = if outcome.is_success() {
            self.ctx
                .store_retry
                .run("complete", move || store.complete(id, generation))
                .await?
        } else {
            self.ctx
                .store_retry
                .run("mark_failed", move || store.fail(id, generation))
                .await?
        };

        match &outcome {
            ExecutionOutcome::Succeeded => {
                tracing::info!(worker_id = self.id, job_id = id, "Completed job successfully")
            }
            ExecutionOutcome::Failed { exit_code } => tracing::warn!(
                worker_id = self.id,
                job_id = id,
                exit_code = ?exit_code,
                "Job FAILED"
            ),
            other => tracing::warn!(
                worker_id = self.id,
                job_id = id,
                kind = other.kind(),
                "Job FAILED"
            ),
        }

        if !settled {
            // Resubmitted while this run was executing: the new submission
            // only becomes claimable now, so no two runs of an id overlap.
            let released = self
                .ctx
                .store_retry
                .run("release", move || store.release_resubmitted(id, generation))
                .await?;
            match released {
                Some(next) => {
                    tracing::info!(
                        worker_id = self.id,
                        job_id = id,
                        generation = next.generation,
                        "Job was resubmitted while running, queueing the new submission"
                    );
                    self.ctx.queue.push(next.descriptor()).await;
                }
                None => tracing::warn!(
                    worker_id = self.id,
                    job_id = id,
                    "Job record changed while running and was not settled"
                ),
            }
        }

        self.ctx
            .registry
            .job_finished(self.id, outcome.is_success())
            .await;
        Ok(Some(outcome))
    }
}

/// Fixed-size set of workers draining one queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    ctx: WorkerContext,
}

impl WorkerPool {
    pub fn new(size: usize, ctx: WorkerContext) -> Self {
        Self { size, ctx }
    }

    pub fn worker(&self, id: usize) -> Worker {
        Worker::new(id, self.ctx.clone())
    }

    /// Spawn every worker into `tasks`; each stops when `shutdown` is cancelled.
    pub fn spawn(&self, tasks: &mut JoinSet<Result<()>>, shutdown: &CancellationToken) {
        for id in 0..self.size {
            let worker = self.worker(id);
            let token = shutdown.clone();
            tasks.spawn(async move { worker.run(token).await });
        }
        tracing::info!(workers = self.size, "Worker pool started");
    }
}
