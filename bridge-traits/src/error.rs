use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a blocking data store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Conflicting ID: {0}")]
    ConflictingId(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {job_id} is not acquired by worker {worker_id}")]
    NotAcquired { job_id: Uuid, worker_id: String },

    #[error("Data store lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Data store operation failed: {0}")]
    OperationFailed(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
