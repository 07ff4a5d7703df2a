use std::collections::{BTreeMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_model::{
    FiredState, FiredTriggerRecord, JobDetail, JobKey, Trigger, TriggerKey,
    TriggerState,
};

use crate::error::Result;

/// Candidate row returned by [`TriggerBackend::select_triggers_to_acquire`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCandidate {
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub job_type: String,
    pub next_fire_time: DateTime<Utc>,
    pub priority: i32,
    pub requests_recovery: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquireQuery {
    pub no_later_than: DateTime<Utc>,
    /// Earliest fire time still considered on time; triggers that ignore
    /// misfires are selected regardless.
    pub no_earlier_than: DateTime<Utc>,
    pub max_count: usize,
    pub excluded_types: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Excluding(HashSet<String>),
    Only(HashSet<String>),
}

impl TypeFilter {
    pub fn matches(&self, job_type: &str) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Excluding(types) => !types.contains(job_type),
            TypeFilter::Only(types) => types.contains(job_type),
        }
    }
}

/// Waiting triggers that are due within a window.
#[derive(Debug, Clone, PartialEq)]
pub struct DueQuery {
    pub no_later_than: DateTime<Utc>,
    pub no_earlier_than: DateTime<Utc>,
    pub types: TypeFilter,
}

impl DueQuery {
    pub fn with_types(&self, types: TypeFilter) -> Self {
        Self {
            types,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitingEntry {
    pub job: JobDetail,
    pub trigger: Trigger,
}

/// Row-level storage primitives. Implementations do no locking of their own
/// beyond what keeps a single call consistent; the job store serialises
/// mutations through its lock.
///
/// Due/acquire queries select `waiting` triggers with
/// `next_fire_time <= no_later_than` and either
/// `next_fire_time >= no_earlier_than` or an ignore-misfires policy,
/// ordered by fire time ascending then priority descending.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TriggerBackend: Send + Sync + fmt::Debug {
    async fn job_exists(&self, key: &JobKey) -> Result<bool>;

    async fn upsert_job(&self, job: &JobDetail) -> Result<()>;

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>>;

    /// Remove the job and all of its triggers.
    async fn delete_job(&self, key: &JobKey) -> Result<bool>;

    async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool>;

    async fn upsert_trigger(
        &self,
        trigger: &Trigger,
        state: TriggerState,
    ) -> Result<()>;

    async fn retrieve_trigger(&self, key: &TriggerKey)
    -> Result<Option<Trigger>>;

    async fn trigger_state(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<TriggerState>>;

    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool>;

    async fn trigger_keys_for_job(&self, key: &JobKey)
    -> Result<Vec<TriggerKey>>;

    async fn update_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
    ) -> Result<u64>;

    /// Compare-and-set: move `key` from `from` to `to`, optionally also
    /// requiring the stored next fire time to equal `expected_next_fire`.
    /// Returns the number of rows changed (0 when another writer won).
    async fn transition_trigger_state(
        &self,
        key: &TriggerKey,
        from: TriggerState,
        to: TriggerState,
        expected_next_fire: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    async fn transition_all_trigger_states(
        &self,
        from: &[TriggerState],
        to: TriggerState,
    ) -> Result<u64>;

    async fn select_triggers_to_acquire(
        &self,
        query: &AcquireQuery,
    ) -> Result<Vec<TriggerCandidate>>;

    /// Waiting triggers that don't ignore misfires and are due before
    /// `before`.
    async fn select_misfired_triggers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TriggerKey>>;

    async fn insert_fired_trigger(&self, record: &FiredTriggerRecord)
    -> Result<()>;

    async fn update_fired_trigger_state(
        &self,
        fire_instance_id: &str,
        state: FiredState,
    ) -> Result<u64>;

    async fn delete_fired_trigger(&self, fire_instance_id: &str) -> Result<u64>;

    async fn select_fired_triggers(&self) -> Result<Vec<FiredTriggerRecord>>;

    async fn delete_all_fired_triggers(&self) -> Result<u64>;

    async fn count_due_triggers(&self, query: &DueQuery) -> Result<usize>;

    async fn select_due_triggers(
        &self,
        query: &DueQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WaitingEntry>>;

    async fn count_due_triggers_by_type(
        &self,
        query: &DueQuery,
    ) -> Result<BTreeMap<String, usize>>;

    /// Remove every job and trigger. In-flight records stay so running jobs
    /// keep counting against their ceilings until they complete.
    async fn clear_jobs_and_triggers(&self) -> Result<()>;
}
