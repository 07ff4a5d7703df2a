use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use reel_model::{QueueEvent, QueueItem};
use tokio::sync::broadcast;
use tracing::info;

use super::state_handler::QueueStateEventHandler;
use crate::error::Result;
use crate::scheduler::Scheduler;

/// Re-creates recurring jobs after the store was cleared.
#[async_trait]
pub trait RecurringJobRegistrar: Send + Sync {
    /// Returns the number of jobs registered.
    async fn register_recurring_jobs(&self) -> Result<usize>;
}

/// Administrative facade over the scheduler, its store and the queue-state
/// handler.
pub struct QueueHandler {
    scheduler: Arc<Scheduler>,
    recurring: Arc<dyn RecurringJobRegistrar>,
    thread_count: OnceLock<usize>,
}

impl fmt::Debug for QueueHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandler")
            .field("scheduler", &self.scheduler)
            .field("thread_count", &self.thread_count.get())
            .finish_non_exhaustive()
    }
}

impl QueueHandler {
    pub fn new(
        scheduler: Arc<Scheduler>,
        recurring: Arc<dyn RecurringJobRegistrar>,
    ) -> Self {
        Self {
            scheduler,
            recurring,
            thread_count: OnceLock::new(),
        }
    }

    /// Handler wired to the scheduler's own recurring jobs.
    pub fn for_scheduler(scheduler: Arc<Scheduler>) -> Self {
        let recurring = scheduler.recurring_jobs();
        Self::new(scheduler, recurring)
    }

    fn events(&self) -> &QueueStateEventHandler {
        self.scheduler.store().events()
    }

    pub fn pause(&self) {
        self.scheduler.standby();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Delete every job and trigger, then register the recurring jobs again.
    pub async fn clear(&self) -> Result<()> {
        self.scheduler.clear().await?;
        let registered = self.recurring.register_recurring_jobs().await?;
        info!(target: "reel::queue", registered, "queue cleared");
        Ok(())
    }

    /// Live scheduler state.
    pub fn paused(&self) -> bool {
        self.scheduler.is_in_standby()
    }

    pub fn thread_count(&self) -> usize {
        *self
            .thread_count
            .get_or_init(|| self.scheduler.thread_pool_size())
    }

    pub fn executing_jobs(&self) -> Vec<QueueItem> {
        self.events().executing_jobs()
    }

    /// Waiting count from the most recent queue event.
    pub fn waiting_count(&self) -> usize {
        self.events().counts().waiting
    }

    /// Blocked count from the most recent queue event.
    pub fn blocked_count(&self) -> usize {
        self.events().counts().blocked
    }

    /// Total count from the most recent queue event.
    pub fn total_count(&self) -> usize {
        self.events().counts().total
    }

    /// Due waiting triggers, read from the store.
    pub async fn total_waiting_job_count(&self) -> Result<usize> {
        self.scheduler.store().total_waiting_triggers_count().await
    }

    pub async fn get_jobs(
        &self,
        max_count: usize,
        offset: usize,
        exclude_blocked: bool,
    ) -> Result<Vec<QueueItem>> {
        self.scheduler
            .store()
            .job_summary(max_count, offset, exclude_blocked)
            .await
    }

    pub async fn get_job_counts(&self) -> Result<BTreeMap<String, usize>> {
        self.scheduler.store().job_counts().await
    }

    pub fn acquisition_filter_results(&self) -> BTreeMap<String, Vec<String>> {
        self.scheduler.store().acquisition_filter_results()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events().subscribe()
    }
}
