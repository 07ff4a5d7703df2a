use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reel_model::JobDataMap;
use serde::{Deserialize, Serialize};

use crate::store::JobStoreOptions;

/// Scheduler runtime knobs.
///
/// Every field has a default, so a partial configuration document is
/// enough.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size; also the thread count reported with queue events.
    pub thread_pool_size: usize,
    /// Upper bound of triggers acquired per pass. 0 means the pool size.
    pub max_batch_size: usize,
    /// Extra lookahead when acquiring, so near-simultaneous triggers are
    /// fired as one batch.
    pub batch_time_window_ms: u64,
    /// How long the loop waits when nothing is due.
    pub idle_wait_ms: u64,
    pub misfire_threshold_ms: u64,
    /// Back-off after a store failure.
    pub db_failure_retry_interval_ms: u64,
    /// Number of waiting jobs attached to queue events.
    pub waiting_cache_size: usize,
    /// Per-type `max_concurrent` overrides for limited job types.
    pub limited_concurrency_overrides: HashMap<String, usize>,
    /// Submissions flushed per batch by `start_job`. 0 or 1 stores
    /// immediately.
    pub batch_max_insert_size: usize,
    /// Longest time a `start_job` submission waits for its batch. 0 stores
    /// immediately.
    pub batch_insert_timeout_ms: u64,
    pub recurring_jobs: Vec<RecurringJobConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: num_cpus::get().max(1),
            max_batch_size: 0,
            batch_time_window_ms: 0,
            idle_wait_ms: 30_000,
            misfire_threshold_ms: 60_000,
            db_failure_retry_interval_ms: 15_000,
            waiting_cache_size: 100,
            limited_concurrency_overrides: HashMap::new(),
            batch_max_insert_size: 500,
            batch_insert_timeout_ms: 250,
            recurring_jobs: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_count(&self) -> usize {
        self.thread_pool_size.max(1)
    }

    pub fn max_batch(&self) -> usize {
        match self.max_batch_size {
            0 => self.worker_count(),
            size => size,
        }
    }

    pub fn batch_time_window(&self) -> Duration {
        Duration::from_millis(self.batch_time_window_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn db_failure_retry_interval(&self) -> Duration {
        Duration::from_millis(self.db_failure_retry_interval_ms)
    }

    pub fn batch_insert_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_insert_timeout_ms)
    }

    /// Submissions bypass batching when either batching knob is off.
    pub fn batching_enabled(&self) -> bool {
        self.batch_max_insert_size > 1 && self.batch_insert_timeout_ms > 0
    }

    pub fn store_options(&self) -> JobStoreOptions {
        JobStoreOptions {
            misfire_threshold: Duration::from_millis(self.misfire_threshold_ms),
            waiting_cache_size: self.waiting_cache_size,
            thread_count: self.worker_count(),
            concurrency_overrides: self.limited_concurrency_overrides.clone(),
        }
    }
}

/// A job registered to run at a fixed interval for as long as the
/// scheduler lives.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecurringJobConfig {
    pub job_type: String,
    /// Job name; defaults to the job type.
    #[serde(default)]
    pub name: Option<String>,
    pub interval_secs: u64,
    #[serde(default)]
    pub start_delay_secs: u64,
    #[serde(default)]
    pub data: JobDataMap,
}

impl RecurringJobConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn job_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.job_type)
    }

    /// First fire time when registered at `now`. `None` when the start
    /// delay, or one interval after it, falls outside the representable
    /// calendar.
    pub fn first_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let delay = chrono::Duration::from_std(self.start_delay()).ok()?;
        let interval = chrono::Duration::from_std(self.interval()).ok()?;
        let start = now.checked_add_signed(delay)?;
        start.checked_add_signed(interval)?;
        Some(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{ "thread_pool_size": 3, "limited_concurrency_overrides": { "Sync": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.thread_pool_size, 3);
        assert_eq!(config.max_batch(), 3);
        assert_eq!(config.idle_wait(), Duration::from_secs(30));
        assert_eq!(config.limited_concurrency_overrides["Sync"], 2);
        assert!(config.batching_enabled());
    }

    #[test]
    fn first_fire_is_bounded_by_the_calendar() {
        let now = Utc::now();
        let mut recurring = RecurringJobConfig {
            job_type: "Sync".into(),
            name: None,
            interval_secs: 60,
            start_delay_secs: 30,
            data: JobDataMap::new(),
        };
        assert_eq!(
            recurring.first_fire_after(now),
            Some(now + chrono::Duration::seconds(30))
        );

        recurring.start_delay_secs = u64::MAX;
        assert_eq!(recurring.first_fire_after(now), None);

        recurring.start_delay_secs = 0;
        recurring.interval_secs = 9_000_000_000_000;
        assert_eq!(recurring.first_fire_after(now), None);
    }

    #[test]
    fn zero_batch_knobs_disable_batching() {
        let config = SchedulerConfig {
            batch_insert_timeout_ms: 0,
            ..SchedulerConfig::default()
        };
        assert!(!config.batching_enabled());

        let config = SchedulerConfig {
            batch_max_insert_size: 1,
            ..SchedulerConfig::default()
        };
        assert!(!config.batching_enabled());
    }
}
