//! Worker pool that runs transfer jobs.
//!
//! - **Execution**: spawns the external transfer executable for a job
//! - **Pool**: N workers draining the shared [`WorkQueue`](crate::scheduler::WorkQueue)
//! - **Heartbeat**: idle workers refresh their liveness entry on every dequeue timeout
//!
//! # Components
//!
//! - [`TransferExecutor`]: runs `program [args...] <id> <src> <dst>` with an optional timeout
//! - [`Worker`] / [`WorkerPool`]: claim, execute and record one job at a time
//! - [`heartbeat::WorkerRegistry`]: per-worker liveness and counters
//! - [`stats::PoolStats`]: pool-wide outcome counters
//!
//! # Execution Flow
//!
//! 1. Worker dequeues a descriptor (bounded wait, so shutdown is noticed)
//! 2. Claims the record: `pending`/`retrying` → `running`
//! 3. [`TransferExecutor::execute`] runs the executable with the record's latest `src`/`dst`
//! 4. Exit 0 deletes the record; anything else marks it `failed`. Both only
//!    apply to the claimed generation: a job resubmitted mid-run is queued
//!    again instead
//!
//! Workers never retry. Moving a job out of `failed` is the retry scanner's job.

pub mod executor;
pub mod heartbeat;
pub mod pool;
pub mod stats;

pub use executor::{ExecutionOutcome, TransferExecutor};
pub use pool::{Worker, WorkerContext, WorkerPool};
pub use stats::{PoolStats, PoolStatsSnapshot};
