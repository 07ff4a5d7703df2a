//! Persistent job store.
//!
//! [`JobStore`] owns every trigger state transition and runs each one under
//! the process-wide [`SemaphoreLock`](crate::concurrency::SemaphoreLock).
//! Row storage is delegated to a [`TriggerBackend`].

mod backend;
mod job_store;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use chrono::{DateTime, Utc};
use reel_model::{JobDetail, Trigger};

pub use backend::{
    AcquireQuery, DueQuery, TriggerBackend, TriggerCandidate, TypeFilter,
    WaitingEntry,
};
#[cfg(test)]
pub use backend::MockTriggerBackend;
pub use job_store::{JobStore, JobStoreOptions, MAX_ACQUIRE_ATTEMPTS};
pub use memory::InMemoryBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::{MIGRATOR, SqliteBackend};

/// Everything a worker needs to run a fired trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiredBundle {
    pub job: JobDetail,
    /// Trigger with its schedule already advanced past this fire.
    pub trigger: Trigger,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Fired from a trigger created by crash recovery.
    pub recovering: bool,
}

/// How the store should treat a trigger whose execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionInstruction {
    #[default]
    Completed,
    /// The job could not be run; park the trigger in the error state.
    SetTriggerError,
}
