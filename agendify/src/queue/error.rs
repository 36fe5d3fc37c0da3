use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Job queue already started")]
    AlreadyStarted,

    #[error("Job queue is not running")]
    NotStarted,
}

pub type QueueResult<T> = Result<T, QueueError>;
