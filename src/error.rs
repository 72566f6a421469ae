use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Errors that may clear up if the same store call is issued again.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Store(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::Database(_)
            ),
            TransferError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
