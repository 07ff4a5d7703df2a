use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reel_model::{
    FiredState, FiredTriggerRecord, JobDetail, JobKey, QueueItem,
    QueueStateContext, RECOVERING_JOBS_GROUP, Trigger, TriggerBuilder,
    TriggerKey, TriggerState,
};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::backend::{AcquireQuery, DueQuery, TriggerBackend, TypeFilter};
use super::{CompletionInstruction, TriggerFiredBundle};
use crate::acquisition::{
    AcquisitionFilter, AcquisitionFilterSet, RequirementFilter,
};
use crate::concurrency::{
    BucketLedger, ConcurrencyPolicy, STATE_ACCESS, SemaphoreLock,
    TRIGGER_ACCESS,
};
use crate::error::{Result, SchedulerError};
use crate::job::JobFactory;
use crate::queue::{QueueStateEventHandler, orphan_item, queue_item};

/// Acquisition attempts per call before giving up with an empty batch.
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

const MAX_MISFIRES_PER_PASS: usize = 20;

/// Triggers due within this lookahead count as waiting.
const DUE_LOOKAHEAD_MS: i64 = 500;

#[derive(Debug, Clone)]
pub struct JobStoreOptions {
    /// Fire times older than this are misfires.
    pub misfire_threshold: Duration,
    /// Number of waiting items attached to queue events.
    pub waiting_cache_size: usize,
    pub thread_count: usize,
    pub concurrency_overrides: HashMap<String, usize>,
}

impl Default for JobStoreOptions {
    fn default() -> Self {
        Self {
            misfire_threshold: Duration::from_secs(60),
            waiting_cache_size: 100,
            thread_count: num_cpus::get().max(1),
            concurrency_overrides: HashMap::new(),
        }
    }
}

/// Trigger state machine over a [`TriggerBackend`].
///
/// Every mutation runs under the [`SemaphoreLock`]; queue events are emitted
/// after the lock has been released.
pub struct JobStore {
    backend: Arc<dyn TriggerBackend>,
    lock: SemaphoreLock,
    factory: Arc<JobFactory>,
    events: Arc<QueueStateEventHandler>,
    filters: AcquisitionFilterSet,
    policy: RwLock<Arc<ConcurrencyPolicy>>,
    signal: Arc<Notify>,
    options: JobStoreOptions,
}

impl fmt::Debug for JobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStore")
            .field("backend", &self.backend)
            .field("lock_held", &self.lock.is_held())
            .field("filters", &self.filters.len())
            .field("options", &self.options)
            .finish()
    }
}

impl JobStore {
    pub fn new(
        backend: Arc<dyn TriggerBackend>,
        factory: Arc<JobFactory>,
        events: Arc<QueueStateEventHandler>,
        options: JobStoreOptions,
    ) -> Self {
        let registry = factory.registry();
        let policy = registry.concurrency_policy(&options.concurrency_overrides);
        let filters = AcquisitionFilterSet::new(RequirementFilter::for_requirements(
            registry.requirement_declarations(),
            factory.server_state(),
        ));

        Self {
            backend,
            lock: SemaphoreLock::new(),
            factory,
            events,
            filters,
            policy: RwLock::new(Arc::new(policy)),
            signal: Arc::new(Notify::new()),
            options,
        }
    }

    /// Adds a filter on top of the requirement filters derived from the
    /// registry.
    pub fn with_filter(mut self, filter: Arc<dyn AcquisitionFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn backend(&self) -> &Arc<dyn TriggerBackend> {
        &self.backend
    }

    pub fn factory(&self) -> &Arc<JobFactory> {
        &self.factory
    }

    pub fn events(&self) -> &Arc<QueueStateEventHandler> {
        &self.events
    }

    pub fn options(&self) -> &JobStoreOptions {
        &self.options
    }

    /// Notified whenever stored work changes in a way the scheduler loop
    /// should look at.
    pub fn scheduling_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.signal)
    }

    pub fn concurrency_policy(&self) -> Arc<ConcurrencyPolicy> {
        Arc::clone(&self.policy.read())
    }

    /// Re-resolve every ceiling against a new override table.
    pub fn reload_concurrency_overrides(
        &self,
        overrides: &HashMap<String, usize>,
    ) {
        let reloaded = self.policy.read().with_overrides(overrides);
        *self.policy.write() = Arc::new(reloaded);
        info!(
            target: "reel::store",
            overrides = overrides.len(),
            "reloaded concurrency overrides"
        );
        self.signal.notify_one();
    }

    // ---------------------------------------------------------------------
    // Acquisition
    // ---------------------------------------------------------------------

    /// Claim up to `max_count` waiting triggers due by `no_later_than`
    /// (plus `time_window`), honouring acquisition filters and concurrency
    /// ceilings. Claimed triggers carry their fire instance id.
    pub async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let window = chrono::Duration::from_std(time_window).map_err(|_| {
            SchedulerError::InvalidArgument(format!(
                "batch time window out of range: {time_window:?}"
            ))
        })?;

        let started = Instant::now();
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let acquired = self
            .acquire_locked(no_later_than, max_count, window)
            .await
            .map_err(store_failure("couldn't acquire next trigger"));
        guard.release()?;

        let acquired = acquired.inspect_err(|err| {
            error!(target: "reel::store", error = %err, "trigger acquisition failed");
        })?;
        trace!(
            target: "reel::store",
            acquired = acquired.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "acquire_next_triggers finished"
        );
        Ok(acquired)
    }

    async fn acquire_locked(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        window: chrono::Duration,
    ) -> Result<Vec<Trigger>> {
        let policy = self.concurrency_policy();
        let registry = self.factory.registry();
        let mut acquired: Vec<Trigger> = Vec::new();

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let in_flight = self.backend.select_fired_triggers().await?;
            let mut ledger = BucketLedger::seeded(
                &policy,
                in_flight.iter().map(|record| record.job_type.as_str()),
            );
            let mut excluded_types = self.filters.excluded_types();
            excluded_types.extend(ledger.saturated_types());

            let now = Utc::now();
            let query = AcquireQuery {
                no_later_than: saturating_add(no_later_than, window),
                no_earlier_than: self.misfire_cutoff(now),
                max_count,
                excluded_types,
            };
            let candidates = self.backend.select_triggers_to_acquire(&query).await?;
            if candidates.is_empty() {
                break;
            }

            let mut batch_end = no_later_than;
            for candidate in candidates {
                let Some(mut trigger) =
                    self.backend.retrieve_trigger(&candidate.trigger_key).await?
                else {
                    continue;
                };

                if !registry.contains(&candidate.job_type) {
                    error!(
                        target: "reel::store",
                        trigger = %trigger.key,
                        job_key = %candidate.job_key,
                        job_type = %candidate.job_type,
                        "job type could not be resolved; trigger set to error state"
                    );
                    if let Err(err) = self
                        .backend
                        .update_trigger_state(&trigger.key, TriggerState::Error)
                        .await
                    {
                        error!(
                            target: "reel::store",
                            trigger = %trigger.key,
                            error = %err,
                            "failed to set trigger to error state"
                        );
                    }
                    continue;
                }

                if !ledger.has_capacity(&candidate.job_type) {
                    debug!(
                        target: "reel::store",
                        trigger = %trigger.key,
                        job_type = %candidate.job_type,
                        "concurrency ceiling reached within batch"
                    );
                    continue;
                }

                let Some(next_fire) = trigger.next_fire_time else {
                    warn!(
                        target: "reel::store",
                        trigger = %trigger.key,
                        "waiting trigger has no next fire time"
                    );
                    continue;
                };

                if next_fire > batch_end {
                    break;
                }

                let changed = self
                    .backend
                    .transition_trigger_state(
                        &trigger.key,
                        TriggerState::Waiting,
                        TriggerState::Acquired,
                        Some(next_fire),
                    )
                    .await?;
                if changed == 0 {
                    continue;
                }

                let record = FiredTriggerRecord {
                    fire_instance_id: Uuid::now_v7().to_string(),
                    trigger_key: trigger.key.clone(),
                    job_key: candidate.job_key.clone(),
                    job_type: candidate.job_type.clone(),
                    state: FiredState::Acquired,
                    fired_at: now,
                    scheduled_at: next_fire,
                    priority: candidate.priority,
                    requests_recovery: candidate.requests_recovery,
                };
                self.backend.insert_fired_trigger(&record).await?;
                ledger.admit(&candidate.job_type);

                if acquired.is_empty() {
                    batch_end = saturating_add(now.max(next_fire), window);
                }
                trigger.fire_instance_id = Some(record.fire_instance_id);
                acquired.push(trigger);
                if acquired.len() >= max_count {
                    break;
                }
            }

            if !acquired.is_empty() {
                break;
            }
            debug!(
                target: "reel::store",
                attempt,
                "no trigger accepted from candidate batch"
            );
        }

        Ok(acquired)
    }

    /// Hand an acquired trigger back without firing it.
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<()> {
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let result = self
            .release_locked(trigger)
            .await
            .map_err(store_failure("couldn't release acquired trigger"));
        guard.release()?;

        self.signal.notify_one();
        result
    }

    async fn release_locked(&self, trigger: &Trigger) -> Result<()> {
        self.backend
            .transition_trigger_state(
                &trigger.key,
                TriggerState::Acquired,
                TriggerState::Waiting,
                None,
            )
            .await?;
        if let Some(id) = &trigger.fire_instance_id {
            self.backend.delete_fired_trigger(id).await?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Firing and completion
    // ---------------------------------------------------------------------

    /// Move acquired triggers to executing and advance their schedules.
    /// Triggers that are no longer acquired or whose job vanished are
    /// dropped from the result. A trigger the backend fails on is handed
    /// back to waiting and the rest of the batch still fires.
    ///
    /// Returns an error only when nothing was fired, so the caller may
    /// release the whole batch.
    pub async fn triggers_fired(
        &self,
        triggers: &[Trigger],
    ) -> Result<Vec<TriggerFiredBundle>> {
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let mut bundles = Vec::with_capacity(triggers.len());
        let mut failure = None;
        for trigger in triggers {
            match self.trigger_fired(trigger).await {
                Ok(Some(bundle)) => bundles.push(bundle),
                Ok(None) => {}
                Err(err) => {
                    let err = store_failure("couldn't fire trigger")(err);
                    error!(
                        target: "reel::store",
                        trigger = %trigger.key,
                        error = %err,
                        "failed to fire trigger; releasing it"
                    );
                    if let Err(release_err) = self.release_locked(trigger).await {
                        error!(
                            target: "reel::store",
                            trigger = %trigger.key,
                            error = %release_err,
                            "failed to release trigger after fire failure"
                        );
                    }
                    failure = Some(err);
                }
            }
        }
        guard.release()?;

        if bundles.is_empty()
            && let Some(err) = failure
        {
            return Err(err);
        }
        if !bundles.is_empty()
            && let Some(ctx) = self.context_for_event().await
        {
            self.events.on_jobs_executing(&bundles, &ctx);
        }
        Ok(bundles)
    }

    async fn trigger_fired(
        &self,
        acquired: &Trigger,
    ) -> Result<Option<TriggerFiredBundle>> {
        let Some(fire_instance_id) = acquired.fire_instance_id.clone() else {
            warn!(
                target: "reel::store",
                trigger = %acquired.key,
                "fired trigger carries no fire instance id"
            );
            return Ok(None);
        };

        let state = self.backend.trigger_state(&acquired.key).await?;
        if state != Some(TriggerState::Acquired) {
            debug!(
                target: "reel::store",
                trigger = %acquired.key,
                state = ?state,
                "trigger no longer acquired; not firing"
            );
            self.backend.delete_fired_trigger(&fire_instance_id).await?;
            return Ok(None);
        }

        let Some(mut trigger) = self.backend.retrieve_trigger(&acquired.key).await?
        else {
            self.backend.delete_fired_trigger(&fire_instance_id).await?;
            return Ok(None);
        };

        let Some(job) = self.backend.retrieve_job(&trigger.job_key).await? else {
            warn!(
                target: "reel::store",
                trigger = %trigger.key,
                job_key = %trigger.job_key,
                "job of fired trigger is missing; trigger set to error state"
            );
            self.backend
                .update_trigger_state(&trigger.key, TriggerState::Error)
                .await?;
            self.backend.delete_fired_trigger(&fire_instance_id).await?;
            return Ok(None);
        };

        self.backend
            .update_fired_trigger_state(&fire_instance_id, FiredState::Executing)
            .await?;

        let scheduled_fire_time = trigger.next_fire_time;
        let previous_fire_time = trigger.previous_fire_time;
        trigger.triggered();
        trigger.fire_instance_id = Some(fire_instance_id.clone());
        self.backend
            .upsert_trigger(&trigger, TriggerState::Executing)
            .await?;

        Ok(Some(TriggerFiredBundle {
            recovering: trigger.key.group == RECOVERING_JOBS_GROUP,
            next_fire_time: trigger.next_fire_time,
            job,
            trigger,
            fire_instance_id,
            fire_time: Utc::now(),
            scheduled_fire_time,
            previous_fire_time,
        }))
    }

    /// Finish a fired trigger: recurring triggers return to waiting,
    /// exhausted ones are removed together with a non-durable job that has
    /// no other trigger.
    pub async fn triggered_job_complete(
        &self,
        bundle: &TriggerFiredBundle,
        instruction: CompletionInstruction,
    ) -> Result<()> {
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let result = self
            .complete_locked(bundle, instruction)
            .await
            .map_err(store_failure("couldn't complete trigger"));
        guard.release()?;
        result?;

        if let Some(ctx) = self.context_for_event().await {
            self.events.on_job_completed(&bundle.job, &ctx);
            if ctx.waiting_triggers_count > 0 {
                self.signal.notify_one();
            }
        }
        Ok(())
    }

    async fn complete_locked(
        &self,
        bundle: &TriggerFiredBundle,
        instruction: CompletionInstruction,
    ) -> Result<()> {
        self.backend
            .delete_fired_trigger(&bundle.fire_instance_id)
            .await?;

        if instruction == CompletionInstruction::SetTriggerError {
            warn!(
                target: "reel::store",
                trigger = %bundle.trigger.key,
                job_key = %bundle.job.key,
                "trigger set to error state after execution"
            );
            self.backend
                .update_trigger_state(&bundle.trigger.key, TriggerState::Error)
                .await?;
            return Ok(());
        }

        let Some(mut trigger) =
            self.backend.retrieve_trigger(&bundle.trigger.key).await?
        else {
            return Ok(());
        };

        if trigger.may_fire_again() {
            trigger.fire_instance_id = None;
            self.backend
                .upsert_trigger(&trigger, TriggerState::Waiting)
                .await
        } else {
            trace!(
                target: "reel::store",
                trigger = %trigger.key,
                state = %TriggerState::Complete,
                "trigger complete"
            );
            self.remove_trigger_locked(&trigger).await.map(|_| ())
        }
    }

    async fn remove_trigger_locked(&self, trigger: &Trigger) -> Result<bool> {
        let removed = self.backend.delete_trigger(&trigger.key).await?;
        if let Some(job) = self.backend.retrieve_job(&trigger.job_key).await?
            && !job.durable
            && self
                .backend
                .trigger_keys_for_job(&job.key)
                .await?
                .is_empty()
        {
            self.backend.delete_job(&job.key).await?;
            trace!(
                target: "reel::store",
                job_key = %job.key,
                "removed non-durable job without triggers"
            );
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Recovery and misfires
    // ---------------------------------------------------------------------

    /// Reset state left behind by a previous process. Returns the number of
    /// recovery triggers created.
    pub async fn recover_jobs(&self) -> Result<usize> {
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let result = self
            .recover_locked()
            .await
            .map_err(store_failure("couldn't recover jobs"));
        guard.release()?;

        let recovered = result?;
        self.signal.notify_one();
        Ok(recovered)
    }

    async fn recover_locked(&self) -> Result<usize> {
        let records = self.backend.select_fired_triggers().await?;
        let mut recovered = 0;

        for record in &records {
            if record.state != FiredState::Executing {
                continue;
            }
            if record.requests_recovery
                && self.backend.job_exists(&record.job_key).await?
            {
                let trigger = TriggerBuilder::new()
                    .with_identity(TriggerKey::new(
                        format!("recover_{}", record.fire_instance_id),
                        RECOVERING_JOBS_GROUP,
                    ))
                    .for_job(record.job_key.clone())
                    .with_description(format!(
                        "recovery of {}",
                        record.trigger_key
                    ))
                    .with_priority(record.priority)
                    .start_now()
                    .build()?;
                self.backend
                    .upsert_trigger(&trigger, TriggerState::Waiting)
                    .await?;
                recovered += 1;
            }

            if let Some(trigger) =
                self.backend.retrieve_trigger(&record.trigger_key).await?
                && !trigger.may_fire_again()
            {
                self.remove_trigger_locked(&trigger).await?;
            }
        }

        let released = self
            .backend
            .transition_all_trigger_states(
                &[TriggerState::Acquired, TriggerState::Executing],
                TriggerState::Waiting,
            )
            .await?;
        let cleared = self.backend.delete_all_fired_triggers().await?;

        info!(
            target: "reel::store",
            recovered,
            released,
            cleared,
            "recovered scheduling state"
        );
        Ok(recovered)
    }

    /// Apply misfire policies to waiting triggers that fell behind.
    /// Returns the number of triggers updated.
    pub async fn handle_misfires(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.misfire_cutoff(now);

        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let result = self
            .misfires_locked(now, before)
            .await
            .map_err(store_failure("couldn't handle misfires"));
        guard.release()?;

        let handled = result?;
        if handled > 0 {
            debug!(target: "reel::store", handled, "handled misfired triggers");
            self.signal.notify_one();
        }
        Ok(handled)
    }

    async fn misfires_locked(
        &self,
        now: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<usize> {
        let keys = self
            .backend
            .select_misfired_triggers(before, MAX_MISFIRES_PER_PASS)
            .await?;
        let mut handled = 0;
        for key in keys {
            let Some(mut trigger) = self.backend.retrieve_trigger(&key).await?
            else {
                continue;
            };
            trigger.update_after_misfire(now);
            if trigger.may_fire_again() {
                self.backend
                    .upsert_trigger(&trigger, TriggerState::Waiting)
                    .await?;
            } else {
                self.remove_trigger_locked(&trigger).await?;
            }
            handled += 1;
        }
        Ok(handled)
    }

    // ---------------------------------------------------------------------
    // Storing and removing
    // ---------------------------------------------------------------------

    pub async fn store_job_and_trigger(
        &self,
        job: JobDetail,
        trigger: Trigger,
    ) -> Result<()> {
        self.store_jobs_and_triggers(vec![(job, vec![trigger])], false)
            .await
            .map(|_| ())
    }

    /// Store jobs with their triggers. Without `replace`, an existing job or
    /// trigger key fails the whole call before anything is written. With
    /// it, in-flight triggers are left untouched. Returns the number of new
    /// jobs.
    pub async fn store_jobs_and_triggers(
        &self,
        entries: Vec<(JobDetail, Vec<Trigger>)>,
        replace: bool,
    ) -> Result<usize> {
        let started = Instant::now();
        let guard = self.lock.obtain(STATE_ACCESS).await?;
        let result = self
            .store_locked(&entries, replace)
            .await
            .map_err(store_failure("couldn't store jobs"));
        guard.release()?;
        let added = result?;

        if !added.is_empty() {
            if let Some(ctx) = self.context_for_event().await {
                self.events.on_jobs_added(&added, &ctx);
            }
            self.signal.notify_one();
        }
        trace!(
            target: "reel::store",
            jobs = entries.len(),
            added = added.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stored jobs"
        );
        Ok(added.len())
    }

    async fn store_locked(
        &self,
        entries: &[(JobDetail, Vec<Trigger>)],
        replace: bool,
    ) -> Result<Vec<JobDetail>> {
        let mut existing = HashSet::new();
        for (job, triggers) in entries {
            if let Some(trigger) =
                triggers.iter().find(|trigger| trigger.job_key != job.key)
            {
                return Err(SchedulerError::InvalidArgument(format!(
                    "trigger {} does not reference job {}",
                    trigger.key, job.key
                )));
            }
            if self.backend.job_exists(&job.key).await? {
                if !replace {
                    return Err(SchedulerError::JobAlreadyExists(job.key.clone()));
                }
                existing.insert(job.key.clone());
            }
            if !replace {
                for trigger in triggers {
                    if self.backend.trigger_exists(&trigger.key).await? {
                        return Err(SchedulerError::TriggerAlreadyExists(
                            trigger.key.clone(),
                        ));
                    }
                }
            }
        }

        let mut added = Vec::new();
        for (job, triggers) in entries {
            self.backend.upsert_job(job).await?;
            for trigger in triggers {
                self.put_trigger(trigger).await?;
            }
            if !existing.contains(&job.key) {
                added.push(job.clone());
            }
        }
        Ok(added)
    }

    /// Write `trigger` as waiting unless it is in flight. Returns whether it
    /// was written.
    async fn put_trigger(&self, trigger: &Trigger) -> Result<bool> {
        match self.backend.trigger_state(&trigger.key).await? {
            Some(TriggerState::Acquired | TriggerState::Executing) => {
                debug!(
                    target: "reel::store",
                    trigger = %trigger.key,
                    "trigger in flight; replacement skipped"
                );
                Ok(false)
            }
            _ => {
                self.backend
                    .upsert_trigger(trigger, TriggerState::Waiting)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Store a trigger for an existing job.
    pub async fn store_trigger(&self, trigger: Trigger, replace: bool) -> Result<bool> {
        let guard = self.lock.obtain(STATE_ACCESS).await?;
        let result = async {
            if !self.backend.job_exists(&trigger.job_key).await? {
                return Err(SchedulerError::InvalidArgument(format!(
                    "trigger {} references unknown job {}",
                    trigger.key, trigger.job_key
                )));
            }
            if !replace && self.backend.trigger_exists(&trigger.key).await? {
                return Err(SchedulerError::TriggerAlreadyExists(trigger.key.clone()));
            }
            self.put_trigger(&trigger).await
        }
        .await
        .map_err(store_failure("couldn't store trigger"));
        guard.release()?;

        let stored = result?;
        if stored {
            self.signal.notify_one();
        }
        Ok(stored)
    }

    /// Add a one-shot `<trigger>_Retry` trigger for the job of `trigger`,
    /// due now. Returns `false` when a retry is already pending.
    pub async fn schedule_retry(&self, trigger: &Trigger) -> Result<bool> {
        let retry_key = trigger.key.retry();
        if self.trigger_exists(&retry_key).await? {
            return Ok(false);
        }
        let retry = TriggerBuilder::new()
            .with_identity(retry_key)
            .for_job(trigger.job_key.clone())
            .with_priority(trigger.priority)
            .start_now()
            .build()?;
        match self.store_trigger(retry, false).await {
            Ok(stored) => Ok(stored),
            Err(SchedulerError::TriggerAlreadyExists(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove a job with all of its triggers.
    pub async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let guard = self.lock.obtain(STATE_ACCESS).await?;
        let result = self
            .backend
            .delete_job(key)
            .await
            .map_err(store_failure("couldn't remove job"));
        guard.release()?;
        result
    }

    pub async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let guard = self.lock.obtain(STATE_ACCESS).await?;
        let result = async {
            match self.backend.retrieve_trigger(key).await? {
                Some(trigger) => self.remove_trigger_locked(&trigger).await,
                None => Ok(false),
            }
        }
        .await
        .map_err(store_failure("couldn't remove trigger"));
        guard.release()?;
        result
    }

    /// `Error -> Waiting`. Returns whether the trigger was in error.
    pub async fn reset_trigger_from_error(&self, key: &TriggerKey) -> Result<bool> {
        let guard = self.lock.obtain(TRIGGER_ACCESS).await?;
        let result = self
            .backend
            .transition_trigger_state(
                key,
                TriggerState::Error,
                TriggerState::Waiting,
                None,
            )
            .await
            .map_err(store_failure("couldn't reset trigger from error"));
        guard.release()?;

        let reset = result? > 0;
        if reset {
            info!(target: "reel::store", trigger = %key, "trigger reset from error state");
            self.signal.notify_one();
        }
        Ok(reset)
    }

    /// Delete every job and trigger. In-flight records stay until their
    /// executions complete.
    pub async fn clear_all_scheduling_data(&self) -> Result<()> {
        let guard = self.lock.obtain(STATE_ACCESS).await?;
        let result = self
            .backend
            .clear_jobs_and_triggers()
            .await
            .map_err(store_failure("couldn't clear scheduling data"));
        guard.release()?;
        result?;
        info!(target: "reel::store", "cleared all scheduling data");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------------

    pub async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.backend
            .retrieve_job(key)
            .await
            .map_err(store_failure("couldn't retrieve job"))
    }

    pub async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        self.backend
            .retrieve_trigger(key)
            .await
            .map_err(store_failure("couldn't retrieve trigger"))
    }

    pub async fn trigger_state(&self, key: &TriggerKey) -> Result<Option<TriggerState>> {
        self.backend
            .trigger_state(key)
            .await
            .map_err(store_failure("couldn't read trigger state"))
    }

    pub async fn check_job_exists(&self, key: &JobKey) -> Result<bool> {
        self.backend
            .job_exists(key)
            .await
            .map_err(store_failure("couldn't check job existence"))
    }

    pub async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        self.backend
            .trigger_exists(key)
            .await
            .map_err(store_failure("couldn't check trigger existence"))
    }

    /// Keys of jobs with an acquired or executing trigger.
    pub async fn in_flight_job_keys(&self) -> Result<HashSet<JobKey>> {
        let records = self
            .backend
            .select_fired_triggers()
            .await
            .map_err(store_failure("couldn't read fired triggers"))?;
        Ok(records.into_iter().map(|record| record.job_key).collect())
    }

    // ---------------------------------------------------------------------
    // Queue state
    // ---------------------------------------------------------------------

    /// Union of filter exclusions and types whose ceiling is saturated by
    /// in-flight executions.
    pub async fn excluded_types(&self) -> Result<HashSet<String>> {
        let policy = self.concurrency_policy();
        let in_flight = self
            .backend
            .select_fired_triggers()
            .await
            .map_err(store_failure("couldn't read fired triggers"))?;
        let ledger = BucketLedger::seeded(
            &policy,
            in_flight.iter().map(|record| record.job_type.as_str()),
        );
        let mut excluded = self.filters.excluded_types();
        excluded.extend(ledger.saturated_types());
        Ok(excluded)
    }

    /// Due triggers that acquisition would currently consider.
    pub async fn waiting_triggers_count(&self) -> Result<usize> {
        let excluded = self.excluded_types().await?;
        self.count_due(TypeFilter::Excluding(excluded)).await
    }

    /// Due triggers held back by filters or saturated ceilings.
    pub async fn blocked_triggers_count(&self) -> Result<usize> {
        let excluded = self.excluded_types().await?;
        if excluded.is_empty() {
            return Ok(0);
        }
        self.count_due(TypeFilter::Only(excluded)).await
    }

    /// All due waiting triggers, blocked or not.
    pub async fn total_waiting_triggers_count(&self) -> Result<usize> {
        self.count_due(TypeFilter::All).await
    }

    /// Due waiting plus executing jobs, grouped by type.
    pub async fn job_counts(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = self
            .backend
            .count_due_triggers_by_type(&self.due_query(TypeFilter::All))
            .await
            .map_err(store_failure("couldn't count jobs"))?;
        let records = self
            .backend
            .select_fired_triggers()
            .await
            .map_err(store_failure("couldn't read fired triggers"))?;
        for record in records {
            if record.state == FiredState::Executing {
                *counts.entry(record.job_type).or_default() += 1;
            }
        }
        Ok(counts)
    }

    /// Executing jobs first, then due waiting jobs in acquisition order,
    /// paged by `max_count` and `offset`.
    pub async fn job_summary(
        &self,
        max_count: usize,
        offset: usize,
        exclude_blocked: bool,
    ) -> Result<Vec<QueueItem>> {
        let excluded = self.excluded_types().await?;
        let mut items = self.executing_items().await?;

        let types = if exclude_blocked && !excluded.is_empty() {
            TypeFilter::Excluding(excluded.clone())
        } else {
            TypeFilter::All
        };
        let waiting = self.waiting_items(types, usize::MAX, 0, &excluded).await?;
        items.extend(waiting);

        Ok(items.into_iter().skip(offset).take(max_count).collect())
    }

    /// Counters and snapshots attached to queue events.
    pub async fn queue_state_context(&self) -> Result<QueueStateContext> {
        let excluded = self.excluded_types().await?;
        let waiting_triggers_count =
            self.count_due(TypeFilter::Excluding(excluded.clone())).await?;
        let blocked_triggers_count = if excluded.is_empty() {
            0
        } else {
            self.count_due(TypeFilter::Only(excluded.clone())).await?
        };
        let currently_executing = self.executing_items().await?;
        let waiting = self
            .waiting_items(
                TypeFilter::All,
                self.options.waiting_cache_size,
                0,
                &excluded,
            )
            .await?;

        Ok(QueueStateContext {
            thread_count: self.options.thread_count,
            waiting_triggers_count,
            blocked_triggers_count,
            total_triggers_count: waiting_triggers_count
                + blocked_triggers_count
                + currently_executing.len(),
            currently_executing,
            waiting,
        })
    }

    /// Filter name to the types it currently excludes.
    pub fn acquisition_filter_results(&self) -> BTreeMap<String, Vec<String>> {
        self.filters.results()
    }

    async fn executing_items(&self) -> Result<Vec<QueueItem>> {
        let records = self
            .backend
            .select_fired_triggers()
            .await
            .map_err(store_failure("couldn't read fired triggers"))?;
        let mut items = Vec::new();
        for record in records
            .iter()
            .filter(|record| record.state == FiredState::Executing)
        {
            let job = self
                .backend
                .retrieve_job(&record.job_key)
                .await
                .map_err(store_failure("couldn't retrieve job"))?;
            items.push(match job {
                Some(job) => {
                    queue_item(&self.factory, &job, true, false, Some(record.fired_at))
                }
                None => orphan_item(record),
            });
        }
        Ok(items)
    }

    async fn waiting_items(
        &self,
        types: TypeFilter,
        limit: usize,
        offset: usize,
        excluded: &HashSet<String>,
    ) -> Result<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .backend
            .select_due_triggers(&self.due_query(types), limit, offset)
            .await
            .map_err(store_failure("couldn't list waiting triggers"))?;
        Ok(entries
            .iter()
            .map(|entry| {
                queue_item(
                    &self.factory,
                    &entry.job,
                    false,
                    excluded.contains(&entry.job.job_type),
                    None,
                )
            })
            .collect())
    }

    async fn count_due(&self, types: TypeFilter) -> Result<usize> {
        self.backend
            .count_due_triggers(&self.due_query(types))
            .await
            .map_err(store_failure("couldn't count waiting triggers"))
    }

    fn due_query(&self, types: TypeFilter) -> DueQuery {
        let now = Utc::now();
        DueQuery {
            no_later_than: now + chrono::Duration::milliseconds(DUE_LOOKAHEAD_MS),
            no_earlier_than: self.misfire_cutoff(now),
            types,
        }
    }

    /// Earliest fire time still on time at `now`.
    fn misfire_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let threshold = chrono::Duration::from_std(self.options.misfire_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now.checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Context for an event; failures only cost the event.
    async fn context_for_event(&self) -> Option<QueueStateContext> {
        match self.queue_state_context().await {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                warn!(
                    target: "reel::store",
                    error = %err,
                    "could not build queue state for event"
                );
                None
            }
        }
    }
}

fn saturating_add(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Wrap unexpected backend errors as store failures. Domain errors pass
/// through unchanged.
fn store_failure(context: &'static str) -> impl Fn(SchedulerError) -> SchedulerError {
    move |err| match err {
        #[cfg(feature = "sqlite")]
        SchedulerError::Database(_) => SchedulerError::persistence(context, err),
        SchedulerError::Serialization(_)
        | SchedulerError::Model(_)
        | SchedulerError::Internal(_) => SchedulerError::persistence(context, err),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use reel_model::{DEFAULT_GROUP, JobBuilder, MisfirePolicy};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use super::*;
    use crate::acquisition::ServerState;
    use crate::job::{Job, JobExecutionContext, JobRegistry, JobServices, JobType};
    use crate::queue::QueueEventBus;
    use crate::store::{
        InMemoryBackend, MockTriggerBackend, TriggerCandidate, WaitingEntry,
    };

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Sweep {
        #[serde(default)]
        target: String,
    }

    #[async_trait]
    impl Job for Sweep {
        fn type_name(&self) -> &str {
            Self::TYPE_NAME
        }

        fn title(&self) -> Option<String> {
            Some(format!("Sweep {}", self.target))
        }

        fn details(&self) -> BTreeMap<String, Value> {
            BTreeMap::from([("target".to_owned(), Value::from(self.target.clone()))])
        }

        async fn process(&mut self, _ctx: &JobExecutionContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl JobType for Sweep {
        const TYPE_NAME: &'static str = "Sweep";
    }

    /// In-memory backend whose `nth` fired-record update fails.
    #[derive(Debug)]
    struct FailingFiredUpdate {
        inner: InMemoryBackend,
        calls: AtomicUsize,
        nth: usize,
    }

    impl FailingFiredUpdate {
        fn new(nth: usize) -> Self {
            Self {
                inner: InMemoryBackend::new(),
                calls: AtomicUsize::new(0),
                nth,
            }
        }
    }

    #[async_trait]
    impl TriggerBackend for FailingFiredUpdate {
        async fn job_exists(&self, key: &JobKey) -> Result<bool> {
            self.inner.job_exists(key).await
        }

        async fn upsert_job(&self, job: &JobDetail) -> Result<()> {
            self.inner.upsert_job(job).await
        }

        async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
            self.inner.retrieve_job(key).await
        }

        async fn delete_job(&self, key: &JobKey) -> Result<bool> {
            self.inner.delete_job(key).await
        }

        async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
            self.inner.trigger_exists(key).await
        }

        async fn upsert_trigger(
            &self,
            trigger: &Trigger,
            state: TriggerState,
        ) -> Result<()> {
            self.inner.upsert_trigger(trigger, state).await
        }

        async fn retrieve_trigger(
            &self,
            key: &TriggerKey,
        ) -> Result<Option<Trigger>> {
            self.inner.retrieve_trigger(key).await
        }

        async fn trigger_state(
            &self,
            key: &TriggerKey,
        ) -> Result<Option<TriggerState>> {
            self.inner.trigger_state(key).await
        }

        async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool> {
            self.inner.delete_trigger(key).await
        }

        async fn trigger_keys_for_job(
            &self,
            key: &JobKey,
        ) -> Result<Vec<TriggerKey>> {
            self.inner.trigger_keys_for_job(key).await
        }

        async fn update_trigger_state(
            &self,
            key: &TriggerKey,
            state: TriggerState,
        ) -> Result<u64> {
            self.inner.update_trigger_state(key, state).await
        }

        async fn transition_trigger_state(
            &self,
            key: &TriggerKey,
            from: TriggerState,
            to: TriggerState,
            expected_next_fire: Option<DateTime<Utc>>,
        ) -> Result<u64> {
            self.inner
                .transition_trigger_state(key, from, to, expected_next_fire)
                .await
        }

        async fn transition_all_trigger_states(
            &self,
            from: &[TriggerState],
            to: TriggerState,
        ) -> Result<u64> {
            self.inner.transition_all_trigger_states(from, to).await
        }

        async fn select_triggers_to_acquire(
            &self,
            query: &AcquireQuery,
        ) -> Result<Vec<TriggerCandidate>> {
            self.inner.select_triggers_to_acquire(query).await
        }

        async fn select_misfired_triggers(
            &self,
            before: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<TriggerKey>> {
            self.inner.select_misfired_triggers(before, limit).await
        }

        async fn insert_fired_trigger(
            &self,
            record: &FiredTriggerRecord,
        ) -> Result<()> {
            self.inner.insert_fired_trigger(record).await
        }

        async fn update_fired_trigger_state(
            &self,
            fire_instance_id: &str,
            state: FiredState,
        ) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.nth {
                return Err(SchedulerError::Internal("fired record write lost".into()));
            }
            self.inner
                .update_fired_trigger_state(fire_instance_id, state)
                .await
        }

        async fn delete_fired_trigger(&self, fire_instance_id: &str) -> Result<u64> {
            self.inner.delete_fired_trigger(fire_instance_id).await
        }

        async fn select_fired_triggers(&self) -> Result<Vec<FiredTriggerRecord>> {
            self.inner.select_fired_triggers().await
        }

        async fn delete_all_fired_triggers(&self) -> Result<u64> {
            self.inner.delete_all_fired_triggers().await
        }

        async fn count_due_triggers(&self, query: &DueQuery) -> Result<usize> {
            self.inner.count_due_triggers(query).await
        }

        async fn select_due_triggers(
            &self,
            query: &DueQuery,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<WaitingEntry>> {
            self.inner.select_due_triggers(query, limit, offset).await
        }

        async fn count_due_triggers_by_type(
            &self,
            query: &DueQuery,
        ) -> Result<BTreeMap<String, usize>> {
            self.inner.count_due_triggers_by_type(query).await
        }

        async fn clear_jobs_and_triggers(&self) -> Result<()> {
            self.inner.clear_jobs_and_triggers().await
        }
    }

    fn store_with(backend: Arc<dyn TriggerBackend>) -> JobStore {
        let mut registry = JobRegistry::new();
        registry.register::<Sweep>();
        let factory = Arc::new(JobFactory::new(
            Arc::new(registry),
            Arc::new(JobServices::new()),
            Arc::new(ServerState::new()),
        ));
        let events = Arc::new(QueueStateEventHandler::new(
            Arc::clone(&factory),
            QueueEventBus::default(),
        ));
        JobStore::new(backend, factory, events, JobStoreOptions::default())
    }

    fn sweep(name: &str) -> (JobDetail, Trigger) {
        let job = JobBuilder::new("Sweep")
            .with_name(name)
            .set_data("target", Value::from(name))
            .build();
        let trigger = TriggerBuilder::new()
            .for_job(job.key.clone())
            .start_at(Utc::now() - chrono::Duration::seconds(1))
            .build()
            .expect("trigger");
        (job, trigger)
    }

    #[tokio::test]
    async fn backend_failure_surfaces_as_persistence_error() {
        let mut backend = MockTriggerBackend::new();
        backend
            .expect_select_fired_triggers()
            .returning(|| Err(SchedulerError::Internal("disk unplugged".into())));
        let store = store_with(Arc::new(backend));

        let err = store
            .acquire_next_triggers(Utc::now(), 4, Duration::ZERO)
            .await
            .expect_err("acquisition should fail");
        assert!(matches!(err, SchedulerError::Persistence(ref msg) if msg.contains("disk unplugged")));
        assert!(!store.lock.is_held());
    }

    #[tokio::test]
    async fn failed_fire_releases_only_that_trigger() {
        let store = store_with(Arc::new(FailingFiredUpdate::new(2)));
        let (first_job, first) = sweep("attic");
        let (second_job, second) = sweep("basement");
        store.store_job_and_trigger(first_job, first).await.unwrap();
        store.store_job_and_trigger(second_job, second).await.unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(acquired.len(), 2);

        let bundles = store.triggers_fired(&acquired).await.unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].trigger.key, acquired[0].key);
        assert!(!store.lock.is_held());

        assert_eq!(
            store.trigger_state(&acquired[0].key).await.unwrap(),
            Some(TriggerState::Executing)
        );
        assert_eq!(
            store.trigger_state(&acquired[1].key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
        let in_flight = store.in_flight_job_keys().await.unwrap();
        assert_eq!(in_flight, HashSet::from([acquired[0].job_key.clone()]));

        let again = store
            .acquire_next_triggers(Utc::now(), 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].key, acquired[1].key);
    }

    #[tokio::test]
    async fn fire_failure_of_whole_batch_is_reported() {
        let store = store_with(Arc::new(FailingFiredUpdate::new(1)));
        let (job, trigger) = sweep("attic");
        let key = trigger.key.clone();
        store.store_job_and_trigger(job, trigger).await.unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 1, Duration::ZERO)
            .await
            .unwrap();
        let err = store
            .triggers_fired(&acquired)
            .await
            .expect_err("nothing fired");
        assert!(matches!(err, SchedulerError::Persistence(ref msg) if msg.contains("fired record write lost")));
        assert_eq!(
            store.trigger_state(&key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
        assert!(store.in_flight_job_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removal_failure_releases_the_lock() {
        let mut backend = MockTriggerBackend::new();
        backend
            .expect_delete_job()
            .returning(|_| Err(SchedulerError::Internal("disk unplugged".into())));
        let store = store_with(Arc::new(backend));

        let err = store
            .remove_job(&JobKey::new("attic", DEFAULT_GROUP))
            .await
            .expect_err("removal should fail");
        assert!(matches!(err, SchedulerError::Persistence(_)));
        assert!(!store.lock.is_held());
    }

    #[tokio::test]
    async fn removing_a_trigger_drops_its_non_durable_job() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, trigger) = sweep("attic");
        store
            .store_job_and_trigger(job.clone(), trigger.clone())
            .await
            .unwrap();

        assert!(store.remove_trigger(&trigger.key).await.unwrap());
        assert!(!store.remove_trigger(&trigger.key).await.unwrap());
        assert!(!store.check_job_exists(&job.key).await.unwrap());
        assert!(!store.lock.is_held());
    }

    #[tokio::test]
    async fn one_shot_completion_removes_trigger_and_job() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, trigger) = sweep("attic");
        store.store_job_and_trigger(job.clone(), trigger).await.unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(acquired.len(), 1);
        let bundles = store.triggers_fired(&acquired).await.unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(
            store.trigger_state(&bundles[0].trigger.key).await.unwrap(),
            Some(TriggerState::Executing)
        );

        store
            .triggered_job_complete(&bundles[0], CompletionInstruction::Completed)
            .await
            .unwrap();
        assert!(!store.check_job_exists(&job.key).await.unwrap());
        assert!(store.in_flight_job_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recurring_trigger_returns_to_waiting() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, _) = sweep("cellar");
        let trigger = TriggerBuilder::new()
            .for_job(job.key.clone())
            .start_at(Utc::now() - chrono::Duration::seconds(1))
            .repeat_forever(Duration::from_secs(3600))
            .build()
            .unwrap();
        let key = trigger.key.clone();
        store.store_job_and_trigger(job, trigger).await.unwrap();

        let acquired = store
            .acquire_next_triggers(Utc::now(), 1, Duration::ZERO)
            .await
            .unwrap();
        let bundles = store.triggers_fired(&acquired).await.unwrap();
        store
            .triggered_job_complete(&bundles[0], CompletionInstruction::Completed)
            .await
            .unwrap();

        assert_eq!(
            store.trigger_state(&key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
        let stored = store.retrieve_trigger(&key).await.unwrap().unwrap();
        assert_eq!(stored.times_triggered, 1);
        assert!(stored.next_fire_time.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn duplicate_job_is_rejected_without_replace() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, trigger) = sweep("garage");
        store
            .store_job_and_trigger(job.clone(), trigger.clone())
            .await
            .unwrap();

        let err = store.store_job_and_trigger(job.clone(), trigger.clone()).await;
        assert!(matches!(err, Err(SchedulerError::JobAlreadyExists(_))));

        let added = store
            .store_jobs_and_triggers(vec![(job, vec![trigger])], true)
            .await
            .unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn retry_trigger_is_added_once() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, trigger) = sweep("shed");
        store
            .store_job_and_trigger(job, trigger.clone())
            .await
            .unwrap();

        assert!(store.schedule_retry(&trigger).await.unwrap());
        assert!(!store.schedule_retry(&trigger).await.unwrap());
        assert!(store.trigger_exists(&trigger.key.retry()).await.unwrap());
    }

    #[tokio::test]
    async fn misfired_trigger_fires_now() {
        let store = store_with(Arc::new(InMemoryBackend::new()));
        let (job, _) = sweep("porch");
        let late = Utc::now() - chrono::Duration::minutes(10);
        let trigger = TriggerBuilder::new()
            .for_job(job.key.clone())
            .start_at(late)
            .with_misfire_policy(MisfirePolicy::FireNow)
            .build()
            .unwrap();
        let key = trigger.key.clone();
        store.store_job_and_trigger(job, trigger).await.unwrap();

        assert_eq!(store.handle_misfires().await.unwrap(), 1);
        let updated = store.retrieve_trigger(&key).await.unwrap().unwrap();
        assert!(updated.next_fire_time.unwrap() > late);
        assert_eq!(store.waiting_triggers_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn error_state_can_be_reset() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());
        let (job, trigger) = sweep("loft");
        let key = trigger.key.clone();
        store.store_job_and_trigger(job, trigger).await.unwrap();
        backend
            .update_trigger_state(&key, TriggerState::Error)
            .await
            .unwrap();

        assert!(store.reset_trigger_from_error(&key).await.unwrap());
        assert!(!store.reset_trigger_from_error(&key).await.unwrap());
        assert_eq!(
            store.trigger_state(&key).await.unwrap(),
            Some(TriggerState::Waiting)
        );
    }
}
