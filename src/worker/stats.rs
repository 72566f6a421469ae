use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::worker::executor::ExecutionOutcome;

/// Pool-wide execution counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    spawn_failed: AtomicU64,
    stale: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub spawn_failed: u64,
    /// Descriptors dropped because the record was no longer claimable.
    pub stale: u64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &ExecutionOutcome) {
        let counter = match outcome {
            ExecutionOutcome::Succeeded => &self.inner.succeeded,
            ExecutionOutcome::Failed { .. } => &self.inner.failed,
            ExecutionOutcome::TimedOut { .. } => &self.inner.timed_out,
            ExecutionOutcome::SpawnFailed { .. } => &self.inner.spawn_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.inner.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
            spawn_failed: self.inner.spawn_failed.load(Ordering::Relaxed),
            stale: self.inner.stale.load(Ordering::Relaxed),
        }
    }
}
