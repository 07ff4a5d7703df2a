use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display projection of a queued or running job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueItem {
    /// Job key rendered as `group.name`.
    pub key: String,
    pub job_type: Option<String>,
    pub title: Option<String>,
    pub details: BTreeMap<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub running: bool,
    pub blocked: bool,
}

/// Counters attached to every queue event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct QueueCounts {
    pub waiting: usize,
    pub blocked: usize,
    /// Waiting + blocked + executing.
    pub total: usize,
    pub executing: usize,
    pub thread_count: usize,
}

/// Snapshot of the store's queue state taken right after a mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueStateContext {
    pub thread_count: usize,
    pub waiting_triggers_count: usize,
    pub blocked_triggers_count: usize,
    pub total_triggers_count: usize,
    pub currently_executing: Vec<QueueItem>,
    /// First `waiting_cache_size` waiting items.
    pub waiting: Vec<QueueItem>,
}

impl QueueStateContext {
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting_triggers_count,
            blocked: self.blocked_triggers_count,
            total: self.total_triggers_count,
            executing: self.currently_executing.len(),
            thread_count: self.thread_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJobsAddedEvent {
    pub added: Vec<QueueItem>,
    pub counts: QueueCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueChangedEvent {
    pub added: Vec<QueueItem>,
    pub removed: Vec<QueueItem>,
    pub executing: Vec<QueueItem>,
    pub waiting: Vec<QueueItem>,
    pub counts: QueueCounts,
}

/// Events published to queue observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    Paused { counts: QueueCounts },
    Started { counts: QueueCounts },
    JobsAdded(QueueJobsAddedEvent),
    ExecutingJobsChanged(QueueChangedEvent),
}

impl QueueEvent {
    pub fn counts(&self) -> QueueCounts {
        match self {
            QueueEvent::Paused { counts } | QueueEvent::Started { counts } => {
                *counts
            }
            QueueEvent::JobsAdded(event) => event.counts,
            QueueEvent::ExecutingJobsChanged(event) => event.counts,
        }
    }
}
