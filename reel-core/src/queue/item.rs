use chrono::{DateTime, Utc};
use reel_model::{FiredTriggerRecord, JobDetail, QueueItem};

use crate::job::JobFactory;

/// Display projection of `job`. The title comes from a freshly built
/// instance and is `None` when the type can't be constructed.
pub fn queue_item(
    factory: &JobFactory,
    job: &JobDetail,
    running: bool,
    blocked: bool,
    start_time: Option<DateTime<Utc>>,
) -> QueueItem {
    let instance = factory.create_job(job);
    QueueItem {
        key: job.key.to_string(),
        job_type: Some(job.job_type.clone()),
        title: instance.as_ref().and_then(|job| job.title()),
        details: instance.map(|job| job.details()).unwrap_or_default(),
        start_time,
        running,
        blocked,
    }
}

/// Fallback projection for an in-flight record whose definition is gone.
pub fn orphan_item(record: &FiredTriggerRecord) -> QueueItem {
    QueueItem {
        key: record.job_key.to_string(),
        job_type: Some(record.job_type.clone()),
        title: None,
        details: Default::default(),
        start_time: Some(record.fired_at),
        running: true,
        blocked: false,
    }
}
