use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::Result;
use crate::scheduler::job::JobStatus;
use crate::scheduler::queue::WorkQueue;
use crate::store::{JobStore, StoreRetry};

/// Result of one scan over the `failed` records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub retried: usize,
    pub abandoned: usize,
}

/// Periodic task that owns every transition out of `failed`.
///
/// Jobs under the retry ceiling are bumped to `retrying` and re-enqueued;
/// the rest become `abandoned`, which nothing ever leaves.
#[derive(Debug, Clone)]
pub struct RetryScanner {
    store: JobStore,
    queue: WorkQueue,
    max_retries: u32,
    interval: Duration,
    store_retry: StoreRetry,
}

impl RetryScanner {
    pub fn new(store: JobStore, queue: WorkQueue, config: &RetryConfig) -> Self {
        Self {
            store,
            queue,
            max_retries: config.max_retries,
            interval: config.scan_interval,
            store_retry: StoreRetry::default(),
        }
    }

    pub fn with_store_retry(mut self, store_retry: StoreRetry) -> Self {
        self.store_retry = store_retry;
        self
    }

    /// Scan immediately, then once per interval, until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            max_retries = self.max_retries,
            "Retry scanner started"
        );

        loop {
            self.scan_once().await?;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Retry scanner stopped");
        Ok(())
    }

    /// Process every record currently `failed`.
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let store = &self.store;
        let failed = self
            .store_retry
            .run("query_failed", move || store.query_by_status(JobStatus::Failed))
            .await?;

        let mut report = ScanReport::default();
        for job in failed {
            let id = job.id;

            if job.retries < self.max_retries {
                let attempt = job.retries + 1;
                let moved = self
                    .store_retry
                    .run("mark_retrying", move || {
                        store.transition(
                            id,
                            &[JobStatus::Failed],
                            JobStatus::Retrying,
                            Some(attempt),
                        )
                    })
                    .await?;
                if !moved {
                    tracing::debug!(job_id = id, "Job changed during scan, skipping");
                    continue;
                }

                tracing::info!(job_id = id, attempt, "Retry job");
                self.queue.push(job.descriptor()).await;
                report.retried += 1;
            } else {
                let moved = self
                    .store_retry
                    .run("mark_abandoned", move || {
                        store.transition(id, &[JobStatus::Failed], JobStatus::Abandoned, None)
                    })
                    .await?;
                if !moved {
                    tracing::debug!(job_id = id, "Job changed during scan, skipping");
                    continue;
                }

                tracing::warn!(
                    job_id = id,
                    retries = job.retries,
                    "Job abandoned after {} attempts",
                    self.max_retries
                );
                report.abandoned += 1;
            }
        }

        if report != ScanReport::default() {
            tracing::info!(
                retried = report.retried,
                abandoned = report.abandoned,
                "Retry scan finished"
            );
        }
        Ok(report)
    }
}
