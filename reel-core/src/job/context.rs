use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reel_model::{JobDetail, Trigger};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::{JobLogger, JobServices, from_data};
use crate::error::Result;
use crate::store::{JobStore, TriggerFiredBundle};

/// What a running job sees of its fire: definition, trigger, timing, shared
/// services and its logger.
pub struct JobExecutionContext {
    bundle: TriggerFiredBundle,
    services: Arc<JobServices>,
    logger: JobLogger,
    store: Arc<JobStore>,
    cancellation: CancellationToken,
}

impl fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("job_key", &self.bundle.job.key)
            .field("trigger", &self.bundle.trigger.key)
            .field("fire_instance_id", &self.bundle.fire_instance_id)
            .field("recovering", &self.bundle.recovering)
            .field("logger", &self.logger.name())
            .finish()
    }
}

impl JobExecutionContext {
    pub fn new(
        bundle: TriggerFiredBundle,
        services: Arc<JobServices>,
        store: Arc<JobStore>,
        cancellation: CancellationToken,
    ) -> Self {
        let logger = JobLogger::for_key(&bundle.job.key);
        Self {
            bundle,
            services,
            logger,
            store,
            cancellation,
        }
    }

    pub fn bundle(&self) -> &TriggerFiredBundle {
        &self.bundle
    }

    pub fn job_detail(&self) -> &JobDetail {
        &self.bundle.job
    }

    pub fn trigger(&self) -> &Trigger {
        &self.bundle.trigger
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.bundle.fire_time
    }

    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.next_fire_time
    }

    /// The fire comes from a recovery trigger created at startup.
    pub fn recovering(&self) -> bool {
        self.bundle.recovering
    }

    pub fn services(&self) -> &JobServices {
        &self.services
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Store the job was fired from, for jobs that report on the queue.
    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Cancelled when the scheduler shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Data map decoded into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        from_data(&self.bundle.job.data)
    }

    /// Ask for this job to run once more, right away. Returns `false` when a
    /// retry is already pending.
    pub async fn reschedule(&self) -> Result<bool> {
        let scheduled = self.store.schedule_retry(&self.bundle.trigger).await?;
        if scheduled {
            self.logger.info("rescheduled for retry");
        }
        Ok(scheduled)
    }
}
