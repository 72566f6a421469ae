//! HTTP submission endpoint and read-only job inspection.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::TransferError;
use crate::scheduler::{self, JobDescriptor, JobRecord, JobStatus, WorkQueue};
use crate::store::JobStore;
use crate::worker::heartbeat::{WorkerRegistry, WorkerState};
use crate::worker::{PoolStats, PoolStatsSnapshot};

#[derive(Debug, Clone)]
pub struct ApiState {
    pub store: JobStore,
    pub queue: WorkQueue,
    pub registry: WorkerRegistry,
    pub stats: PoolStats,
    /// Idle workers silent for longer than this are reported as not alive.
    pub heartbeat_timeout: Duration,
}

/// Body of `POST /add_job`. `src` and `dst` are base64 encoded.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub id: i64,
    pub src: String,
    pub dst: String,
}

impl SubmitJobRequest {
    pub fn encode(id: i64, src: &str, dst: &str) -> Self {
        Self {
            id,
            src: STANDARD.encode(src),
            dst: STANDARD.encode(dst),
        }
    }

    pub fn decode(self) -> Result<JobDescriptor, TransferError> {
        Ok(JobDescriptor {
            id: self.id,
            src: decode_field("src", &self.src)?,
            dst: decode_field("dst", &self.dst)?,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<String, TransferError> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|e| TransferError::InvalidSubmission(format!("{} is not base64: {}", name, e)))?;
    String::from_utf8(bytes)
        .map_err(|_| TransferError::InvalidSubmission(format!("{} is not valid UTF-8", name)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub status: String,
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub queue_depth: usize,
    pub jobs: BTreeMap<String, u64>,
    pub pool: PoolStatsSnapshot,
}

/// Entry of `GET /api/workers`.
#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub worker: WorkerState,
    pub alive: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps crate errors onto HTTP status codes.
pub struct ApiError(TransferError);

impl From<TransferError> for ApiError {
    fn from(e: TransferError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TransferError::InvalidSubmission(_) | TransferError::InvalidStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            TransferError::JobNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/add_job", post(submit_job_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:id", get(get_job_handler))
        .route("/api/workers", get(list_workers_handler))
        .route("/api/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Submission endpoint listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job = payload.decode()?;
    let id = job.id;
    scheduler::submit(&state.store, &state.queue, job).await?;

    Ok(Json(SubmitJobResponse {
        status: "queued".to_string(),
        id,
    }))
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobRecord>>, ApiError> {
    let jobs = match query.status {
        Some(status) => {
            let status: JobStatus = status.parse()?;
            state.store.query_by_status(status).await?
        }
        None => state.store.list().await?,
    };
    Ok(Json(jobs))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(TransferError::JobNotFound(id)))
}

async fn list_workers_handler(State(state): State<ApiState>) -> Json<Vec<WorkerStatus>> {
    let workers = state
        .registry
        .all()
        .await
        .into_iter()
        .map(|worker| WorkerStatus {
            alive: worker.is_alive(state.heartbeat_timeout),
            worker,
        })
        .collect();
    Json(workers)
}

async fn stats_handler(State(state): State<ApiState>) -> Result<Json<StatsResponse>, ApiError> {
    let mut jobs: BTreeMap<String, u64> = JobStatus::ALL
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for (status, count) in state.store.count_by_status().await? {
        jobs.insert(status.to_string(), count);
    }

    Ok(Json(StatsResponse {
        queue_depth: state.queue.len().await,
        jobs,
        pool: state.stats.snapshot(),
    }))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
