use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::NodeConfig;
use crate::error::{Result, TransferError};
use crate::scheduler::{self, JobDescriptor, RecoveryReport, RetryScanner, WorkQueue};
use crate::store::{JobStore, StoreRetry};
use crate::worker::heartbeat::WorkerRegistry;
use crate::worker::{PoolStats, TransferExecutor, WorkerContext, WorkerPool};

/// Owns the store handle and the work queue and wires every component to them.
///
/// Nothing here is global: workers, the retry scanner and the HTTP handlers
/// receive their handles from the node when they are built.
#[derive(Debug, Clone)]
pub struct Node {
    config: NodeConfig,
    store: JobStore,
    queue: WorkQueue,
    registry: WorkerRegistry,
    stats: PoolStats,
}

impl Node {
    /// Open the store named in `config` and build a node around it.
    pub async fn open(config: NodeConfig) -> Result<Self> {
        let store = JobStore::open(&config.store.path).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: NodeConfig, store: JobStore) -> Self {
        Self {
            config,
            store,
            queue: WorkQueue::new(),
            registry: WorkerRegistry::new(),
            stats: PoolStats::new(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    fn store_retry(&self) -> StoreRetry {
        StoreRetry::from_config(&self.config.store)
    }

    /// Accept a job: persist it as `pending` and enqueue it.
    pub async fn submit(&self, job: JobDescriptor) -> Result<()> {
        scheduler::submit(&self.store, &self.queue, job).await
    }

    /// Enqueue work left over from a previous process.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        scheduler::recover(&self.store, &self.queue, self.config.recovery).await
    }

    pub fn worker_pool(&self) -> WorkerPool {
        let ctx = WorkerContext {
            store: self.store.clone(),
            queue: self.queue.clone(),
            executor: TransferExecutor::new(self.config.executor.clone()),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            store_retry: self.store_retry(),
            dequeue_timeout: self.config.effective_dequeue_timeout(),
        };
        WorkerPool::new(self.config.worker_count, ctx)
    }

    pub fn retry_scanner(&self) -> RetryScanner {
        RetryScanner::new(self.store.clone(), self.queue.clone(), &self.config.retry)
            .with_store_retry(self.store_retry())
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            store: self.store.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            heartbeat_timeout: self.config.heartbeat_timeout(),
        }
    }

    /// Bind the configured address and run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        // Recovery has to finish before submissions are accepted.
        self.recover().await?;
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Run every component against an already bound listener.
    ///
    /// Starts the worker pool, the retry scanner and the HTTP server as one
    /// supervised task set. The first task to fail cancels `shutdown` for the
    /// rest; once all tasks have stopped that error is returned.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        self.worker_pool().spawn(&mut tasks, &shutdown);

        let scanner = self.retry_scanner();
        let token = shutdown.clone();
        tasks.spawn(async move { scanner.run(token).await });

        let state = self.api_state();
        let token = shutdown.clone();
        tasks.spawn(async move {
            api::serve(listener, state, token)
                .await
                .map_err(TransferError::from)
        });

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| TransferError::Internal(format!("task panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                tracing::error!(error = %e, "Node task failed, shutting down");
                shutdown.cancel();
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("All node tasks stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
