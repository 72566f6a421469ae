use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// Lifecycle state of a stored job. Success has no status: the record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
    Retrying,
    Abandoned,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Abandoned => "abandoned",
        }
    }

    /// Statuses a worker may claim a job from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        *self == JobStatus::Abandoned
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `pending` is reachable from anywhere because a resubmission replaces
    /// the record outright.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (_, Pending) => true,
            (Pending | Retrying, Running) => true,
            (Running, Failed) => true,
            (Failed, Retrying | Abandoned) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            "retrying" => Ok(JobStatus::Retrying),
            "abandoned" => Ok(JobStatus::Abandoned),
            other => Err(TransferError::InvalidStatus(other.to_string())),
        }
    }
}

/// What travels through the work queue: enough to run the transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: i64,
    pub src: String,
    pub dst: String,
}

impl JobDescriptor {
    pub fn new(id: i64, src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            id,
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// A row of the persisted store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub src: String,
    pub dst: String,
    pub status: JobStatus,
    pub retries: u32,
    /// Bumped on every resubmission of the id.
    pub generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            id: self.id,
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_forms_match() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_eq!(status.to_string(), status.as_str());
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "completed".parse::<JobStatus>().unwrap_err();
        assert!(matches!(err, TransferError::InvalidStatus(s) if s == "completed"));
    }

    #[test]
    fn abandoned_is_terminal() {
        assert!(JobStatus::Abandoned.is_terminal());
        assert!(!JobStatus::Abandoned.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Abandoned.can_transition_to(JobStatus::Retrying));
        assert!(!JobStatus::Abandoned.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn only_scanner_transitions_leave_failed() {
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Retrying));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Abandoned));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn claimable_statuses() {
        assert!(JobStatus::Pending.is_claimable());
        assert!(JobStatus::Retrying.is_claimable());
        assert!(!JobStatus::Running.is_claimable());
        assert!(!JobStatus::Failed.is_claimable());
        assert!(!JobStatus::Abandoned.is_claimable());
    }

    #[test]
    fn record_descriptor() {
        let now = Utc::now();
        let record = JobRecord {
            id: 9,
            src: "/a".to_string(),
            dst: "/b".to_string(),
            status: JobStatus::Retrying,
            retries: 1,
            generation: 0,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(record.descriptor(), JobDescriptor::new(9, "/a", "/b"));
    }
}
