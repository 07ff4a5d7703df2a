use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reel_model::{
    FiredState, FiredTriggerRecord, JobDetail, JobKey, MisfirePolicy,
    Trigger, TriggerKey, TriggerState,
};

use super::backend::{
    AcquireQuery, DueQuery, TriggerBackend, TriggerCandidate, TypeFilter,
    WaitingEntry,
};
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobKey, JobDetail>,
    triggers: HashMap<TriggerKey, (Trigger, TriggerState)>,
    fired: BTreeMap<String, FiredTriggerRecord>,
}

impl MemoryState {
    /// Waiting triggers due in the window, in acquisition order.
    fn due<'a>(
        &'a self,
        no_later_than: DateTime<Utc>,
        no_earlier_than: DateTime<Utc>,
        types: &'a TypeFilter,
    ) -> Vec<(&'a Trigger, &'a JobDetail)> {
        let mut due: Vec<(&Trigger, &JobDetail)> = self
            .triggers
            .values()
            .filter(|(_, state)| *state == TriggerState::Waiting)
            .filter_map(|(trigger, _)| {
                let next = trigger.next_fire_time?;
                if next > no_later_than {
                    return None;
                }
                if next < no_earlier_than
                    && trigger.misfire_policy != MisfirePolicy::IgnoreMisfires
                {
                    return None;
                }
                let job = self.jobs.get(&trigger.job_key)?;
                types.matches(&job.job_type).then_some((trigger, job))
            })
            .collect();
        due.sort_by(|(a, _), (b, _)| {
            a.next_fire_time
                .cmp(&b.next_fire_time)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.key.cmp(&b.key))
        });
        due
    }
}

/// Volatile backend for tests and ephemeral schedulers.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
}

impl fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBackend")
            .field("jobs", &state.jobs.len())
            .field("triggers", &state.triggers.len())
            .field("fired", &state.fired.len())
            .finish()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerBackend for InMemoryBackend {
    async fn job_exists(&self, key: &JobKey) -> Result<bool> {
        Ok(self.state.lock().jobs.contains_key(key))
    }

    async fn upsert_job(&self, job: &JobDetail) -> Result<()> {
        self.state.lock().jobs.insert(job.key.clone(), job.clone());
        Ok(())
    }

    async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        Ok(self.state.lock().jobs.get(key).cloned())
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let mut state = self.state.lock();
        state.triggers.retain(|_, (trigger, _)| &trigger.job_key != key);
        Ok(state.jobs.remove(key).is_some())
    }

    async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        Ok(self.state.lock().triggers.contains_key(key))
    }

    async fn upsert_trigger(
        &self,
        trigger: &Trigger,
        state: TriggerState,
    ) -> Result<()> {
        self.state
            .lock()
            .triggers
            .insert(trigger.key.clone(), (trigger.clone(), state));
        Ok(())
    }

    async fn retrieve_trigger(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<Trigger>> {
        Ok(self
            .state
            .lock()
            .triggers
            .get(key)
            .map(|(trigger, _)| trigger.clone()))
    }

    async fn trigger_state(
        &self,
        key: &TriggerKey,
    ) -> Result<Option<TriggerState>> {
        Ok(self.state.lock().triggers.get(key).map(|(_, state)| *state))
    }

    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool> {
        Ok(self.state.lock().triggers.remove(key).is_some())
    }

    async fn trigger_keys_for_job(
        &self,
        key: &JobKey,
    ) -> Result<Vec<TriggerKey>> {
        let mut keys: Vec<TriggerKey> = self
            .state
            .lock()
            .triggers
            .values()
            .filter(|(trigger, _)| &trigger.job_key == key)
            .map(|(trigger, _)| trigger.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn update_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
    ) -> Result<u64> {
        match self.state.lock().triggers.get_mut(key) {
            Some((_, current)) => {
                *current = state;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn transition_trigger_state(
        &self,
        key: &TriggerKey,
        from: TriggerState,
        to: TriggerState,
        expected_next_fire: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let Some((trigger, current)) = state.triggers.get_mut(key) else {
            return Ok(0);
        };
        if *current != from {
            return Ok(0);
        }
        if let Some(expected) = expected_next_fire
            && trigger.next_fire_time != Some(expected)
        {
            return Ok(0);
        }
        *current = to;
        Ok(1)
    }

    async fn transition_all_trigger_states(
        &self,
        from: &[TriggerState],
        to: TriggerState,
    ) -> Result<u64> {
        let mut changed = 0;
        for (_, state) in self.state.lock().triggers.values_mut() {
            if from.contains(state) {
                *state = to;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn select_triggers_to_acquire(
        &self,
        query: &AcquireQuery,
    ) -> Result<Vec<TriggerCandidate>> {
        let state = self.state.lock();
        let types = TypeFilter::Excluding(query.excluded_types.clone());
        Ok(state
            .due(query.no_later_than, query.no_earlier_than, &types)
            .into_iter()
            .take(query.max_count)
            .filter_map(|(trigger, job)| {
                Some(TriggerCandidate {
                    trigger_key: trigger.key.clone(),
                    job_key: job.key.clone(),
                    job_type: job.job_type.clone(),
                    next_fire_time: trigger.next_fire_time?,
                    priority: trigger.priority,
                    requests_recovery: job.requests_recovery,
                })
            })
            .collect())
    }

    async fn select_misfired_triggers(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TriggerKey>> {
        let state = self.state.lock();
        let mut misfired: Vec<(&Trigger, DateTime<Utc>)> = state
            .triggers
            .values()
            .filter(|(trigger, state)| {
                *state == TriggerState::Waiting
                    && trigger.misfire_policy != MisfirePolicy::IgnoreMisfires
            })
            .filter_map(|(trigger, _)| {
                let next = trigger.next_fire_time?;
                (next < before).then_some((trigger, next))
            })
            .collect();
        misfired.sort_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| b.0.priority.cmp(&a.0.priority))
        });
        Ok(misfired
            .into_iter()
            .take(limit)
            .map(|(trigger, _)| trigger.key.clone())
            .collect())
    }

    async fn insert_fired_trigger(
        &self,
        record: &FiredTriggerRecord,
    ) -> Result<()> {
        self.state
            .lock()
            .fired
            .insert(record.fire_instance_id.clone(), record.clone());
        Ok(())
    }

    async fn update_fired_trigger_state(
        &self,
        fire_instance_id: &str,
        state: FiredState,
    ) -> Result<u64> {
        match self.state.lock().fired.get_mut(fire_instance_id) {
            Some(record) => {
                record.state = state;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_fired_trigger(&self, fire_instance_id: &str) -> Result<u64> {
        Ok(u64::from(
            self.state.lock().fired.remove(fire_instance_id).is_some(),
        ))
    }

    async fn select_fired_triggers(&self) -> Result<Vec<FiredTriggerRecord>> {
        let mut records: Vec<FiredTriggerRecord> =
            self.state.lock().fired.values().cloned().collect();
        records.sort_by(|a, b| a.fired_at.cmp(&b.fired_at));
        Ok(records)
    }

    async fn delete_all_fired_triggers(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let removed = state.fired.len() as u64;
        state.fired.clear();
        Ok(removed)
    }

    async fn count_due_triggers(&self, query: &DueQuery) -> Result<usize> {
        Ok(self
            .state
            .lock()
            .due(query.no_later_than, query.no_earlier_than, &query.types)
            .len())
    }

    async fn select_due_triggers(
        &self,
        query: &DueQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WaitingEntry>> {
        Ok(self
            .state
            .lock()
            .due(query.no_later_than, query.no_earlier_than, &query.types)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(trigger, job)| WaitingEntry {
                job: job.clone(),
                trigger: trigger.clone(),
            })
            .collect())
    }

    async fn count_due_triggers_by_type(
        &self,
        query: &DueQuery,
    ) -> Result<BTreeMap<String, usize>> {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for (_, job) in
            state.due(query.no_later_than, query.no_earlier_than, &query.types)
        {
            *counts.entry(job.job_type.clone()).or_default() += 1;
        }
        Ok(counts)
    }

    async fn clear_jobs_and_triggers(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.jobs.clear();
        state.triggers.clear();
        Ok(())
    }
}
