use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Liveness and progress of one pool worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub id: usize,
    pub last_heartbeat: DateTime<Utc>,
    pub current_job: Option<i64>,
    pub completed: u64,
    pub failed: u64,
}

impl WorkerState {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            last_heartbeat: Utc::now(),
            current_job: None,
            completed: 0,
            failed: 0,
        }
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// A worker busy with a long transfer does not heartbeat, so it counts as alive.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        if self.current_job.is_some() {
            return true;
        }
        let elapsed = Utc::now()
            .signed_duration_since(self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);
        elapsed < timeout
    }
}

/// Shared view of every worker's heartbeat, written by the workers and read by the API.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<BTreeMap<usize, WorkerState>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, worker_id: usize) {
        self.workers
            .write()
            .await
            .insert(worker_id, WorkerState::new(worker_id));
        tracing::debug!(worker_id, "Worker registered");
    }

    pub async fn deregister(&self, worker_id: usize) {
        self.workers.write().await.remove(&worker_id);
    }

    pub async fn heartbeat(&self, worker_id: usize) {
        let mut workers = self.workers.write().await;
        workers
            .entry(worker_id)
            .or_insert_with(|| WorkerState::new(worker_id))
            .update_heartbeat();
    }

    pub async fn job_started(&self, worker_id: usize, job_id: i64) {
        if let Some(worker) = self.workers.write().await.get_mut(&worker_id) {
            worker.current_job = Some(job_id);
            worker.update_heartbeat();
        }
    }

    pub async fn job_finished(&self, worker_id: usize, success: bool) {
        if let Some(worker) = self.workers.write().await.get_mut(&worker_id) {
            worker.current_job = None;
            if success {
                worker.completed += 1;
            } else {
                worker.failed += 1;
            }
            worker.update_heartbeat();
        }
    }

    pub async fn all(&self) -> Vec<WorkerState> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn get(&self, worker_id: usize) -> Option<WorkerState> {
        self.workers.read().await.get(&worker_id).cloned()
    }
}
