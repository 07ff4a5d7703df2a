use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reel_model::{JobBuilder, JobKey, MisfirePolicy, TriggerBuilder};
use tracing::{info, warn};

use super::config::RecurringJobConfig;
use crate::error::Result;
use crate::queue::RecurringJobRegistrar;
use crate::store::JobStore;

/// Registers the configured recurring jobs: durable jobs with a
/// repeat-forever trigger that skips missed fires.
pub struct RecurringJobs {
    store: Arc<JobStore>,
    jobs: Vec<RecurringJobConfig>,
}

impl fmt::Debug for RecurringJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringJobs")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl RecurringJobs {
    pub fn new(store: Arc<JobStore>, jobs: Vec<RecurringJobConfig>) -> Self {
        Self { store, jobs }
    }

    pub fn jobs(&self) -> &[RecurringJobConfig] {
        &self.jobs
    }
}

#[async_trait]
impl RecurringJobRegistrar for RecurringJobs {
    async fn register_recurring_jobs(&self) -> Result<usize> {
        let registry = self.store.factory().registry();
        let mut entries = Vec::with_capacity(self.jobs.len());

        for config in &self.jobs {
            let Some(registration) = registry.get(&config.job_type) else {
                warn!(
                    target: "reel::scheduler",
                    job_type = %config.job_type,
                    "recurring job type is not registered; skipped"
                );
                continue;
            };
            if config.interval_secs == 0 {
                warn!(
                    target: "reel::scheduler",
                    job_type = %config.job_type,
                    "recurring job has a zero interval; skipped"
                );
                continue;
            }

            let job = JobBuilder::new(config.job_type.clone())
                .with_identity(JobKey::new(config.job_name(), registration.group))
                .using_job_data(config.data.clone())
                .store_durably(true)
                .request_recovery(registration.requests_recovery)
                .disallow_concurrent_execution(
                    registration.concurrency.disallow_concurrent,
                )
                .build();
            let Some(start) = config.first_fire_after(Utc::now()) else {
                warn!(
                    target: "reel::scheduler",
                    job_type = %config.job_type,
                    interval_secs = config.interval_secs,
                    start_delay_secs = config.start_delay_secs,
                    "recurring job schedule is out of range; skipped"
                );
                continue;
            };
            let trigger = TriggerBuilder::new()
                .for_job(job.key.clone())
                .with_description(format!("every {}s", config.interval_secs))
                .start_at(start)
                .repeat_forever(config.interval())
                .with_misfire_policy(MisfirePolicy::SkipMissed)
                .build()?;
            entries.push((job, vec![trigger]));
        }

        let registered = entries.len();
        if registered > 0 {
            self.store.store_jobs_and_triggers(entries, true).await?;
        }
        info!(target: "reel::scheduler", registered, "registered recurring jobs");
        Ok(registered)
    }
}
