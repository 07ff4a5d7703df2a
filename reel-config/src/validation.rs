use chrono::Utc;
use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.items.iter().any(|warning| warning.field == field)
    }
}

/// Settings that cannot be worked around at runtime.
#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("database.url must be a sqlite:// url, got {url:?}")]
    UnsupportedDatabaseUrl { url: String },

    #[error("database.max_connections must be at least 1")]
    NoDatabaseConnections,

    #[error("recurring job entry {index} has an empty job_type")]
    EmptyRecurringJobType { index: usize },

    #[error(
        "recurring job entry {index} schedules past the supported calendar \
         (interval_secs = {interval_secs}, start_delay_secs = {start_delay_secs})"
    )]
    RecurringScheduleOutOfRange {
        index: usize,
        interval_secs: u64,
        start_delay_secs: u64,
    },
}

pub fn validate(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let url = config.database.url.trim();
    if !url.starts_with("sqlite:") {
        return Err(ConfigGuardRailError::UnsupportedDatabaseUrl {
            url: config.database.url.clone(),
        });
    }
    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::NoDatabaseConnections);
    }

    let scheduler = &config.scheduler;
    let mut warnings = ConfigWarnings::default();

    if scheduler.thread_pool_size == 0 {
        warnings.push(
            "scheduler.thread_pool_size",
            "thread pool size of 0 runs a single worker",
        );
    }
    if scheduler.max_batch_size > scheduler.worker_count() {
        warnings.push(
            "scheduler.max_batch_size",
            format!(
                "batch size {} exceeds the worker pool; acquisition is capped at {}",
                scheduler.max_batch_size,
                scheduler.worker_count()
            ),
        );
    }
    let mut zero_overrides: Vec<_> = scheduler
        .limited_concurrency_overrides
        .iter()
        .filter(|(_, limit)| **limit == 0)
        .map(|(job_type, _)| job_type.as_str())
        .collect();
    zero_overrides.sort_unstable();
    for job_type in zero_overrides {
        warnings.push(
            format!("scheduler.limited_concurrency_overrides.{job_type}"),
            "override of 0 is raised to 1",
        );
    }

    for (index, job) in scheduler.recurring_jobs.iter().enumerate() {
        if job.job_type.trim().is_empty() {
            return Err(ConfigGuardRailError::EmptyRecurringJobType { index });
        }
        if job.first_fire_after(Utc::now()).is_none() {
            return Err(ConfigGuardRailError::RecurringScheduleOutOfRange {
                index,
                interval_secs: job.interval_secs,
                start_delay_secs: job.start_delay_secs,
            });
        }
        if job.interval_secs == 0 {
            warnings.push(
                format!("scheduler.recurring_jobs[{index}].interval_secs"),
                format!("recurring job {} has a zero interval and is skipped", job.job_type),
            );
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use reel_core::scheduler::RecurringJobConfig;

    use super::*;

    #[test]
    fn defaults_are_clean() {
        let warnings = validate(&Config::default()).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_sqlite_url_is_rejected() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/reel".into();
        assert!(matches!(
            validate(&config),
            Err(ConfigGuardRailError::UnsupportedDatabaseUrl { .. })
        ));
    }

    #[test]
    fn recurring_schedule_past_the_calendar_is_rejected() {
        let mut config = Config::default();
        config.scheduler.recurring_jobs.push(RecurringJobConfig {
            job_type: "QueueSummary".into(),
            name: None,
            interval_secs: 3_600,
            start_delay_secs: 0,
            data: Default::default(),
        });
        assert!(validate(&config).is_ok());

        config.scheduler.recurring_jobs[0].interval_secs = 10_000_000_000_000;
        assert!(matches!(
            validate(&config),
            Err(ConfigGuardRailError::RecurringScheduleOutOfRange { index: 0, .. })
        ));

        config.scheduler.recurring_jobs[0].interval_secs = 3_600;
        config.scheduler.recurring_jobs[0].start_delay_secs = u64::MAX;
        assert!(matches!(
            validate(&config),
            Err(ConfigGuardRailError::RecurringScheduleOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn suspicious_scheduler_settings_warn() {
        let mut config = Config::default();
        config.scheduler.thread_pool_size = 0;
        config
            .scheduler
            .limited_concurrency_overrides
            .insert("Sync".into(), 0);
        config.scheduler.recurring_jobs.push(RecurringJobConfig {
            job_type: "QueueSummary".into(),
            name: None,
            interval_secs: 0,
            start_delay_secs: 0,
            data: Default::default(),
        });

        let warnings = validate(&config).unwrap();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.has_field("scheduler.thread_pool_size"));
        assert!(warnings.has_field("scheduler.limited_concurrency_overrides.Sync"));
        assert!(warnings.has_field("scheduler.recurring_jobs[0].interval_secs"));
    }
}
