use reel_model::{JobKey, ModelError, TriggerKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Unexpected failure of the backing store. Acquisition and firing
    /// surface this for the whole call; the scheduler loop backs off.
    #[error("Job store failure: {0}")]
    Persistence(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid model value: {0}")]
    Model(#[from] ModelError),

    #[error("Job type not registered: {0}")]
    JobTypeNotFound(String),

    #[error("Failed to construct job {key} ({job_type}): {reason}")]
    JobConstruction {
        key: JobKey,
        job_type: String,
        reason: String,
    },

    #[error("Job already exists: {0}")]
    JobAlreadyExists(JobKey),

    #[error("Trigger already exists: {0}")]
    TriggerAlreadyExists(TriggerKey),

    #[error("Lock '{0}' released without being held")]
    LockNotHeld(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Scheduler is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Wrap an unexpected error as a store failure with context.
    pub fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        SchedulerError::Persistence(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
