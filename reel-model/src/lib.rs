//! Value objects shared across the reel scheduler crates: job and trigger
//! definitions, in-flight firing records and the queue-state snapshots that
//! observers receive.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod job;
pub mod keys;
pub mod queue;
pub mod trigger;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use job::{JobBuilder, JobDataMap, JobDetail, job_identity};
pub use keys::{DEFAULT_GROUP, JobKey, RECOVERING_JOBS_GROUP, TriggerKey};
pub use queue::{
    QueueChangedEvent, QueueCounts, QueueEvent, QueueItem,
    QueueJobsAddedEvent, QueueStateContext,
};
pub use trigger::{
    DEFAULT_PRIORITY, FiredState, FiredTriggerRecord, MisfirePolicy,
    PRIORITIZED, Schedule, Trigger, TriggerBuilder, TriggerState,
};
