//! Durable job table backed by SQLite.
//!
//! Every method issues a single statement, so each call commits atomically
//! and no lock is held between calls. Callers that need compare-and-set
//! semantics use [`JobStore::transition`] or [`JobStore::claim`] rather than
//! a read followed by a write.
//!
//! Each submission of an id bumps its `generation`. A worker settles a run
//! with the generation it claimed, so a run never deletes or fails a newer
//! submission of the same id.

pub mod retry;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{Result, TransferError};
use crate::scheduler::job::{JobRecord, JobStatus};

pub use retry::StoreRetry;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY,
        src TEXT NOT NULL,
        dst TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        retries INTEGER NOT NULL DEFAULT 0,
        generation INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
";

const COLUMNS: &str = "id, src, dst, status, retries, generation, created_at, updated_at";

/// SQL list literal of the statuses matching `pred`, e.g. `'pending', 'retrying'`.
fn status_list(pred: impl Fn(&JobStatus) -> bool) -> String {
    JobStatus::ALL
        .iter()
        .filter(|s| pred(*s))
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    /// A private in-memory database, gone when the store is dropped.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is a separate database, so pin to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Close the underlying pool; later calls fail with a store error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create or replace the record for `id` as a fresh job with zero retries.
    ///
    /// The record becomes `pending`, except while a worker is executing the id:
    /// then it stays `running` under a new generation, and the worker hands it
    /// back to the queue once the current run ends (see
    /// [`JobStore::release_resubmitted`]).
    pub async fn upsert(&self, id: i64, src: &str, dst: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, src, dst, status, retries, generation, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, 0, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                src = excluded.src,
                dst = excluded.dst,
                status = CASE WHEN jobs.status = 'running' THEN 'running' ELSE 'pending' END,
                retries = 0,
                generation = jobs.generation + 1,
                updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(src)
        .bind(dst)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove the record. Returns false if it did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a successfully run job claimed at `generation`.
    ///
    /// Returns false if the record was resubmitted since the claim.
    pub async fn complete(&self, id: i64, generation: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = ?1 AND status = 'running' AND generation = ?2",
        )
        .bind(id)
        .bind(generation)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a run claimed at `generation` as `failed`.
    ///
    /// Returns false if the record was resubmitted since the claim.
    pub async fn fail(&self, id: i64, generation: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', updated_at = ?3
             WHERE id = ?1 AND status = 'running' AND generation = ?2",
        )
        .bind(id)
        .bind(generation)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a job resubmitted during the run claimed at `generation` back to
    /// `pending` and return it, so it can be enqueued again.
    pub async fn release_resubmitted(
        &self,
        id: i64,
        generation: i64,
    ) -> Result<Option<JobRecord>> {
        let sql = format!(
            "UPDATE jobs SET status = 'pending', updated_at = ?3
             WHERE id = ?1 AND status = 'running' AND generation <> ?2
             RETURNING {}",
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(generation)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_row).transpose()
    }

    /// Overwrite status (and optionally retries). Terminal records are left untouched.
    pub async fn set_status(
        &self,
        id: i64,
        status: JobStatus,
        retries: Option<u32>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE jobs
             SET status = ?2, retries = COALESCE(?3, retries), updated_at = ?4
             WHERE id = ?1 AND status NOT IN ({})",
            status_list(JobStatus::is_terminal)
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(retries.map(i64::from))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-set: move `id` to `to` only if its current status is one of `from`.
    ///
    /// Returns whether the row changed. Requests that the lifecycle forbids
    /// are rejected before touching the database.
    pub async fn transition(
        &self,
        id: i64,
        from: &[JobStatus],
        to: JobStatus,
        retries: Option<u32>,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        if let Some(bad) = from.iter().find(|s| !s.can_transition_to(to)) {
            return Err(TransferError::Internal(format!(
                "illegal transition {} -> {} for job {}",
                bad, to, id
            )));
        }

        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE jobs
             SET status = ?2, retries = COALESCE(?3, retries), updated_at = ?4
             WHERE id = ?1 AND status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(retries.map(i64::from))
            .bind(Utc::now());
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically move a `pending` or `retrying` job to `running` and return it.
    ///
    /// `None` means the job is gone or not claimable. The returned generation
    /// is what the worker settles the run with.
    pub async fn claim(&self, id: i64) -> Result<Option<JobRecord>> {
        let sql = format!(
            "UPDATE jobs SET status = 'running', updated_at = ?2
             WHERE id = ?1 AND status IN ({})
             RETURNING {}",
            status_list(JobStatus::is_claimable),
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_row).transpose()
    }

    pub async fn get(&self, id: i64) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_row).transpose()
    }

    /// All records in `status`, ordered by id.
    pub async fn query_by_status(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs WHERE status = ?1 ORDER BY id", COLUMNS);
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_row).collect()
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs ORDER BY id", COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_row).collect()
    }

    pub async fn count_by_status(&self) -> Result<Vec<(JobStatus, u64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| -> Result<(JobStatus, u64)> {
                let status: String = row.try_get("status")?;
                let n: i64 = row.try_get("n")?;
                Ok((status.parse()?, n.max(0) as u64))
            })
            .collect()
    }
}

fn map_row(row: &SqliteRow) -> Result<JobRecord> {
    let status: String = row.try_get("status")?;
    let retries: i64 = row.try_get("retries")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        src: row.try_get("src")?,
        dst: row.try_get("dst")?,
        status: status.parse()?,
        retries: u32::try_from(retries)
            .map_err(|_| TransferError::Internal(format!("negative retry count {}", retries)))?,
        generation: row.try_get("generation")?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> JobStore {
        JobStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_pending_record() {
        let store = store().await;
        store.upsert(1, "/a", "/b").await.unwrap();

        let job = store.get(1).await.unwrap().unwrap();
        assert_eq!(job.src, "/a");
        assert_eq!(job.dst, "/b");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 0);
    }

    #[tokio::test]
    async fn upsert_replaces_and_resets_retries() {
        let store = store().await;
        store.upsert(1, "/a", "/b").await.unwrap();
        store.set_status(1, JobStatus::Failed, Some(2)).await.unwrap();
        let first = store.get(1).await.unwrap().unwrap();

        store.upsert(1, "/c", "/d").await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);

        let job = &all[0];
        assert_eq!((job.src.as_str(), job.dst.as_str()), ("/c", "/d"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retries, 0);
        assert_eq!(job.created_at, first.created_at);
        assert_eq!(job.generation, first.generation + 1);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = store().await;
        store.upsert(5, "s", "d").await.unwrap();
        assert!(store.delete(5).await.unwrap());
        assert!(!store.delete(5).await.unwrap());
        assert!(store.get(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_and_fail_need_a_running_claim() {
        let store = store().await;
        store.upsert(5, "s", "d").await.unwrap();
        assert!(!store.complete(5, 0).await.unwrap());
        assert!(!store.fail(5, 0).await.unwrap());

        let claimed = store.claim(5).await.unwrap().unwrap();
        assert!(store.fail(5, claimed.generation).await.unwrap());
        assert_eq!(store.get(5).await.unwrap().unwrap().status, JobStatus::Failed);

        store.set_status(5, JobStatus::Retrying, Some(1)).await.unwrap();
        let claimed = store.claim(5).await.unwrap().unwrap();
        assert!(store.complete(5, claimed.generation).await.unwrap());
        assert!(store.get(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_of_running_job_defers_to_the_current_run() {
        let store = store().await;
        store.upsert(8, "/old", "/d").await.unwrap();
        let claimed = store.claim(8).await.unwrap().unwrap();

        store.upsert(8, "/new", "/d").await.unwrap();
        let job = store.get(8).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.src, "/new");
        assert_eq!(job.generation, claimed.generation + 1);

        // Nobody else may start it, and the old run cannot settle it.
        assert!(store.claim(8).await.unwrap().is_none());
        assert!(!store.complete(8, claimed.generation).await.unwrap());
        assert!(!store.fail(8, claimed.generation).await.unwrap());

        let released = store
            .release_resubmitted(8, claimed.generation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert_eq!(released.src, "/new");

        // Released once; the next claim picks up the new generation.
        let next = store.claim(8).await.unwrap().unwrap();
        assert_eq!(next.generation, claimed.generation + 1);
        assert!(store
            .release_resubmitted(8, next.generation)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn set_status_keeps_retries_when_none() {
        let store = store().await;
        store.upsert(1, "s", "d").await.unwrap();
        store.set_status(1, JobStatus::Failed, Some(2)).await.unwrap();
        store.set_status(1, JobStatus::Running, None).await.unwrap();

        let job = store.get(1).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.retries, 2);
    }

    #[tokio::test]
    async fn set_status_never_leaves_abandoned() {
        let store = store().await;
        store.upsert(1, "s", "d").await.unwrap();
        assert!(store.set_status(1, JobStatus::Abandoned, Some(3)).await.unwrap());
        assert!(!store.set_status(1, JobStatus::Retrying, Some(4)).await.unwrap());

        let job = store.get(1).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Abandoned);
        assert_eq!(job.retries, 3);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = store().await;
        store.upsert(1, "s", "d").await.unwrap();

        assert!(!store
            .transition(1, &[JobStatus::Failed], JobStatus::Retrying, Some(1))
            .await
            .unwrap());
        assert!(store
            .transition(1, &[JobStatus::Pending], JobStatus::Running, None)
            .await
            .unwrap());
        assert_eq!(store.get(1).await.unwrap().unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn transition_rejects_illegal_moves() {
        let store = store().await;
        store.upsert(1, "s", "d").await.unwrap();
        let err = store
            .transition(1, &[JobStatus::Abandoned], JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Internal(_)));
    }

    #[tokio::test]
    async fn claim_only_takes_claimable_jobs() {
        let store = store().await;
        store.upsert(1, "/a", "/b").await.unwrap();

        let claimed = store.claim(1).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.src, "/a");

        // Already running: a second claim must not succeed.
        assert!(store.claim(1).await.unwrap().is_none());
        // Missing id.
        assert!(store.claim(42).await.unwrap().is_none());

        store.set_status(1, JobStatus::Retrying, Some(1)).await.unwrap();
        let again = store.claim(1).await.unwrap().unwrap();
        assert_eq!(again.retries, 1);
    }

    #[tokio::test]
    async fn query_by_status_filters_and_orders() {
        let store = store().await;
        for id in [3, 1, 2] {
            store.upsert(id, "s", "d").await.unwrap();
        }
        store.set_status(2, JobStatus::Failed, None).await.unwrap();

        let pending: Vec<i64> = store
            .query_by_status(JobStatus::Pending)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(pending, vec![1, 3]);

        let failed = store.query_by_status(JobStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 2);
    }

    #[tokio::test]
    async fn count_by_status_groups() {
        let store = store().await;
        for id in 1..=3 {
            store.upsert(id, "s", "d").await.unwrap();
        }
        store.set_status(3, JobStatus::Failed, None).await.unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert!(counts.contains(&(JobStatus::Pending, 2)));
        assert!(counts.contains(&(JobStatus::Failed, 1)));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");

        {
            let store = JobStore::open(&path).await.unwrap();
            store.upsert(11, "/x", "/y").await.unwrap();
            store.set_status(11, JobStatus::Failed, Some(1)).await.unwrap();
            store.close().await;
        }

        let store = JobStore::open(&path).await.unwrap();
        let job = store.get(11).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 1);
    }

    #[tokio::test]
    async fn closed_store_reports_errors() {
        let store = store().await;
        store.close().await;
        let err = store.upsert(1, "s", "d").await.unwrap_err();
        assert!(matches!(err, TransferError::Store(_)));
    }
}
