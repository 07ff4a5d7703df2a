use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::keys::{JobKey, TriggerKey};

/// Priority used for ordinary submissions.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Priority applied to submissions that asked to jump the queue.
pub const PRIORITIZED: i32 = 10;

/// Persisted lifecycle state of a trigger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Waiting,
    Acquired,
    Executing,
    Complete,
    Error,
}

impl TriggerState {
    pub const fn as_str(self) -> &'static str {
        match self {
            TriggerState::Waiting => "waiting",
            TriggerState::Acquired => "acquired",
            TriggerState::Executing => "executing",
            TriggerState::Complete => "complete",
            TriggerState::Error => "error",
        }
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerState {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "waiting" => Ok(TriggerState::Waiting),
            "acquired" => Ok(TriggerState::Acquired),
            "executing" => Ok(TriggerState::Executing),
            "complete" => Ok(TriggerState::Complete),
            "error" => Ok(TriggerState::Error),
            other => Err(ModelError::UnknownState(other.to_owned())),
        }
    }
}

/// State of an in-flight firing record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FiredState {
    Acquired,
    Executing,
}

impl FiredState {
    pub const fn as_str(self) -> &'static str {
        match self {
            FiredState::Acquired => "acquired",
            FiredState::Executing => "executing",
        }
    }
}

impl FromStr for FiredState {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "acquired" => Ok(FiredState::Acquired),
            "executing" => Ok(FiredState::Executing),
            other => Err(ModelError::UnknownState(other.to_owned())),
        }
    }
}

/// What to do with a trigger whose fire time slipped past the misfire
/// threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Fire as soon as possible, however late.
    #[default]
    IgnoreMisfires,
    /// Move the next fire time to now.
    FireNow,
    /// Recurring triggers skip to the next future slot; one-shot triggers
    /// behave like [`MisfirePolicy::FireNow`].
    SkipMissed,
}

impl MisfirePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            MisfirePolicy::IgnoreMisfires => "ignore_misfires",
            MisfirePolicy::FireNow => "fire_now",
            MisfirePolicy::SkipMissed => "skip_missed",
        }
    }
}

impl FromStr for MisfirePolicy {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "ignore_misfires" => Ok(MisfirePolicy::IgnoreMisfires),
            "fire_now" => Ok(MisfirePolicy::FireNow),
            "skip_missed" => Ok(MisfirePolicy::SkipMissed),
            other => Err(ModelError::UnknownState(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Schedule {
    #[default]
    Once,
    Repeat {
        interval: Duration,
        /// Repeats after the first fire; `None` repeats forever.
        repeat_count: Option<u32>,
    },
}

/// Schedule attached to a job. Only the job store mutates fire times and
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub schedule: Schedule,
    pub misfire_policy: MisfirePolicy,
    pub times_triggered: u32,
    /// Set while the trigger is in flight.
    pub fire_instance_id: Option<String>,
}

impl Trigger {
    /// Advance the schedule after a fire.
    pub fn triggered(&mut self) {
        self.times_triggered = self.times_triggered.saturating_add(1);
        self.previous_fire_time = self.next_fire_time;
        self.next_fire_time = match (self.schedule, self.previous_fire_time) {
            (Schedule::Once, _) | (_, None) => None,
            (Schedule::Repeat { interval, repeat_count }, Some(previous)) => {
                if repeat_count.is_some_and(|count| self.times_triggered > count)
                {
                    None
                } else {
                    to_chrono(interval)
                        .and_then(|step| previous.checked_add_signed(step))
                }
            }
        };
    }

    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// Apply the misfire policy relative to `now`.
    pub fn update_after_misfire(&mut self, now: DateTime<Utc>) {
        match (self.misfire_policy, self.schedule) {
            (MisfirePolicy::IgnoreMisfires, _) => {}
            (MisfirePolicy::FireNow, _)
            | (MisfirePolicy::SkipMissed, Schedule::Once) => {
                self.next_fire_time = Some(now);
            }
            (
                MisfirePolicy::SkipMissed,
                Schedule::Repeat { interval, repeat_count },
            ) => {
                let Some(next) = self.next_fire_time else {
                    return;
                };
                if next >= now || interval.is_zero() {
                    return;
                }
                let Some(step) = to_chrono(interval) else {
                    self.next_fire_time = None;
                    return;
                };
                let behind = (now - next).num_milliseconds();
                let step_ms = step.num_milliseconds().max(1);
                let skipped = behind / step_ms + i64::from(behind % step_ms != 0);
                let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);

                self.times_triggered =
                    self.times_triggered.saturating_add(skipped);
                if repeat_count.is_some_and(|count| self.times_triggered > count)
                {
                    self.next_fire_time = None;
                } else {
                    self.next_fire_time = i32::try_from(skipped)
                        .ok()
                        .and_then(|skipped| step.checked_mul(skipped))
                        .and_then(|offset| next.checked_add_signed(offset));
                }
            }
        }
    }
}

/// `None` when the interval doesn't fit a chrono duration; the trigger then
/// has no further fire.
fn to_chrono(interval: Duration) -> Option<chrono::Duration> {
    chrono::Duration::from_std(interval).ok()
}

/// Fluent builder for [`Trigger`].
#[derive(Debug, Clone, Default)]
pub struct TriggerBuilder {
    key: Option<TriggerKey>,
    job_key: Option<JobKey>,
    description: Option<String>,
    priority: Option<i32>,
    start_time: Option<DateTime<Utc>>,
    schedule: Schedule,
    misfire_policy: MisfirePolicy,
}

impl TriggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, key: TriggerKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn for_job(mut self, job_key: JobKey) -> Self {
        self.job_key = Some(job_key);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn start_at(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn start_now(self) -> Self {
        self.start_at(Utc::now())
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn repeat_forever(self, interval: Duration) -> Self {
        self.with_schedule(Schedule::Repeat {
            interval,
            repeat_count: None,
        })
    }

    pub fn with_misfire_policy(mut self, policy: MisfirePolicy) -> Self {
        self.misfire_policy = policy;
        self
    }

    /// Build the trigger. Without an explicit identity the trigger shares the
    /// job's key.
    pub fn build(self) -> Result<Trigger> {
        let job_key = self.job_key.ok_or_else(|| {
            ModelError::InvalidTrigger("trigger has no job key".into())
        })?;
        if let Schedule::Repeat { interval, .. } = self.schedule
            && interval.is_zero()
        {
            return Err(ModelError::InvalidTrigger(format!(
                "repeat interval for {job_key} must be positive"
            )));
        }

        let start_time = self.start_time.unwrap_or_else(Utc::now);
        Ok(Trigger {
            key: self.key.unwrap_or_else(|| TriggerKey::for_job(&job_key)),
            job_key,
            description: self.description,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            start_time,
            next_fire_time: Some(start_time),
            previous_fire_time: None,
            schedule: self.schedule,
            misfire_policy: self.misfire_policy,
            times_triggered: 0,
            fire_instance_id: None,
        })
    }
}

/// In-flight record written when a trigger is acquired and kept until its
/// execution completes. Crash recovery reads these back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredTriggerRecord {
    pub fire_instance_id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub job_type: String,
    pub state: FiredState,
    pub fired_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub priority: i32,
    pub requests_recovery: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn repeating(count: Option<u32>) -> Trigger {
        TriggerBuilder::new()
            .for_job(JobKey::with_default_group("job"))
            .start_at(at(1_000))
            .with_schedule(Schedule::Repeat {
                interval: Duration::from_secs(60),
                repeat_count: count,
            })
            .with_misfire_policy(MisfirePolicy::SkipMissed)
            .build()
            .expect("valid trigger")
    }

    #[test]
    fn one_shot_trigger_does_not_fire_again() {
        let mut trigger = TriggerBuilder::new()
            .for_job(JobKey::with_default_group("job"))
            .start_at(at(10))
            .build()
            .expect("valid trigger");
        assert_eq!(trigger.key, TriggerKey::with_default_group("job"));

        trigger.triggered();
        assert_eq!(trigger.previous_fire_time, Some(at(10)));
        assert!(!trigger.may_fire_again());
    }

    #[test]
    fn repeat_count_limits_fires() {
        let mut trigger = repeating(Some(1));
        trigger.triggered();
        assert_eq!(trigger.next_fire_time, Some(at(1_060)));
        trigger.triggered();
        assert_eq!(trigger.next_fire_time, None);
    }

    #[test]
    fn skip_missed_jumps_to_next_future_slot() {
        let mut trigger = repeating(None);
        trigger.update_after_misfire(at(1_000 + 150));
        assert_eq!(trigger.next_fire_time, Some(at(1_180)));
        assert_eq!(trigger.times_triggered, 3);
    }

    #[test]
    fn interval_past_the_calendar_ends_the_schedule() {
        for interval in [
            Duration::from_secs(10_000_000_000_000),
            Duration::from_secs(9_000_000_000_000),
        ] {
            let mut trigger = TriggerBuilder::new()
                .for_job(JobKey::with_default_group("job"))
                .start_at(at(1_000))
                .repeat_forever(interval)
                .build()
                .expect("valid trigger");
            trigger.triggered();
            assert_eq!(trigger.previous_fire_time, Some(at(1_000)));
            assert_eq!(trigger.next_fire_time, None);
        }
    }

    #[test]
    fn skip_missed_with_huge_interval_ends_the_schedule() {
        let mut trigger = TriggerBuilder::new()
            .for_job(JobKey::with_default_group("job"))
            .start_at(at(1_000))
            .repeat_forever(Duration::from_secs(9_000_000_000_000))
            .with_misfire_policy(MisfirePolicy::SkipMissed)
            .build()
            .expect("valid trigger");
        trigger.update_after_misfire(at(1_150));
        assert_eq!(trigger.next_fire_time, None);
    }

    #[test]
    fn fire_now_moves_next_fire_time() {
        let mut trigger = repeating(None);
        trigger.misfire_policy = MisfirePolicy::FireNow;
        trigger.update_after_misfire(at(5_000));
        assert_eq!(trigger.next_fire_time, Some(at(5_000)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = TriggerBuilder::new()
            .for_job(JobKey::with_default_group("job"))
            .repeat_forever(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn states_round_trip_through_storage_names() {
        for state in [
            TriggerState::Waiting,
            TriggerState::Acquired,
            TriggerState::Executing,
            TriggerState::Complete,
            TriggerState::Error,
        ] {
            assert_eq!(state.as_str().parse::<TriggerState>().ok(), Some(state));
        }
        assert!("paused".parse::<TriggerState>().is_err());
    }
}
