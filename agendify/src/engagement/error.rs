use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Procedure exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Procedure did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Engagement trigger already running")]
    AlreadyRunning,

    #[error("Engagement trigger is not running")]
    NotRunning,
}

pub type TriggerResult<T> = Result<T, TriggerError>;
