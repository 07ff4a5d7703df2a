//! Scheduler runtime: one loop task that acquires and fires triggers, and a
//! fixed pool of workers that run the jobs.
//!
//! The loop waits while in standby, reserves free workers, applies misfire
//! policies, acquires a batch, sleeps until the first fire time and then
//! hands every fired trigger to a worker. Store failures back off for
//! `db_failure_retry_interval_ms`; an empty batch waits `idle_wait_ms` or
//! until the store signals a scheduling change.

pub mod config;
mod recurring;
mod submitter;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use reel_model::{
    DEFAULT_PRIORITY, JobDetail, JobKey, PRIORITIZED, Trigger, TriggerBuilder,
};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::job::{JobExecutionContext, JobType, job_detail};
use crate::queue::RecurringJobRegistrar;
use crate::store::{CompletionInstruction, JobStore, TriggerFiredBundle};

pub use config::{RecurringJobConfig, SchedulerConfig};
pub use recurring::RecurringJobs;
pub use submitter::JobSubmitter;

/// Poll interval while in standby, in case a resume notification is missed.
const STANDBY_POLL: Duration = Duration::from_secs(1);

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<JobStore>,
    recurring: Arc<RecurringJobs>,
    workers: Arc<Semaphore>,
    standby: AtomicBool,
    started: AtomicBool,
    signal: Arc<Notify>,
    shutdown: CancellationToken,
    job_cancellation: CancellationToken,
    jobs: TaskTracker,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    submitter: OnceLock<JobSubmitter>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("standby", &self.is_in_standby())
            .field("started", &self.started.load(Ordering::Acquire))
            .field("free_workers", &self.workers.available_permits())
            .field("running_jobs", &self.jobs.len())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, store: Arc<JobStore>) -> Arc<Self> {
        let recurring = Arc::new(RecurringJobs::new(
            Arc::clone(&store),
            config.recurring_jobs.clone(),
        ));
        Arc::new(Self {
            workers: Arc::new(Semaphore::new(config.worker_count())),
            signal: store.scheduling_signal(),
            config,
            store,
            recurring,
            standby: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            job_cancellation: CancellationToken::new(),
            jobs: TaskTracker::new(),
            loop_handle: Mutex::new(None),
            submitter: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Registrar for the configured recurring jobs.
    pub fn recurring_jobs(&self) -> Arc<dyn RecurringJobRegistrar> {
        Arc::clone(&self.recurring) as Arc<dyn RecurringJobRegistrar>
    }

    /// Recover state left by a previous process, register recurring jobs,
    /// spawn the loop and leave standby. Starting again only resumes.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Shutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            self.resume();
            return Ok(());
        }

        self.store.recover_jobs().await?;
        self.recurring.register_recurring_jobs().await?;

        let handle = tokio::spawn(Arc::clone(self).run_loop());
        *self.loop_handle.lock() = Some(handle);

        info!(
            target: "reel::scheduler",
            workers = self.config.worker_count(),
            max_batch = self.config.max_batch(),
            "scheduler started"
        );
        self.resume();
        Ok(())
    }

    /// Stop acquiring triggers. Running jobs continue.
    pub fn standby(&self) {
        self.standby.store(true, Ordering::Release);
        self.store.events().on_paused();
    }

    pub fn resume(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.standby.store(false, Ordering::Release);
        self.store.events().on_resumed();
        self.signal.notify_one();
    }

    pub fn is_in_standby(&self) -> bool {
        self.standby.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn thread_pool_size(&self) -> usize {
        self.config.worker_count()
    }

    /// Stop the loop. With `wait_for_jobs` running jobs finish normally;
    /// otherwise their cancellation tokens fire and they are not awaited.
    pub async fn shutdown(&self, wait_for_jobs: bool) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        info!(target: "reel::scheduler", wait_for_jobs, "shutting down scheduler");
        self.standby();
        self.shutdown.cancel();
        if !wait_for_jobs {
            self.job_cancellation.cancel();
        }

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(target: "reel::scheduler", error = %err, "scheduler loop ended abnormally");
        }

        self.jobs.close();
        if wait_for_jobs {
            self.jobs.wait().await;
        }
        info!(target: "reel::scheduler", "scheduler shut down");
        Ok(())
    }

    pub async fn schedule_job(&self, job: JobDetail, trigger: Trigger) -> Result<()> {
        self.ensure_running()?;
        self.store.store_job_and_trigger(job, trigger).await
    }

    pub async fn schedule_jobs(
        &self,
        entries: Vec<(JobDetail, Vec<Trigger>)>,
        replace: bool,
    ) -> Result<usize> {
        self.ensure_running()?;
        self.store.store_jobs_and_triggers(entries, replace).await
    }

    /// Remove every job and trigger from the store.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_all_scheduling_data().await
    }

    pub async fn check_exists(&self, key: &JobKey) -> Result<bool> {
        self.store.check_job_exists(key).await
    }

    /// Wake the loop so it re-reads the store.
    pub fn signal_scheduling_change(&self) {
        self.signal.notify_one();
    }

    /// Run a job of type `T` once, configured by `configure`, with a
    /// generated identity. Submissions of a job that is already queued or
    /// executing are skipped. Returns the job key.
    pub async fn start_job<T, F>(
        &self,
        configure: F,
        prioritize: bool,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<JobKey>
    where
        T: JobType,
        F: FnOnce(&mut T),
    {
        self.ensure_running()?;
        let job = self.store.factory().create_standalone::<T, F>(configure)?;
        let detail = job_detail(&job)?;
        let trigger = TriggerBuilder::new()
            .for_job(detail.key.clone())
            .with_priority(if prioritize {
                PRIORITIZED
            } else {
                DEFAULT_PRIORITY
            })
            .start_at(start_time.unwrap_or_else(Utc::now))
            .build()?;
        let key = detail.key.clone();

        if self.config.batching_enabled() {
            self.submitter().submit(detail, trigger).await?;
        } else {
            submitter::store_submissions(&self.store, vec![(detail, trigger)]).await?;
        }
        Ok(key)
    }

    fn submitter(&self) -> &JobSubmitter {
        self.submitter.get_or_init(|| {
            JobSubmitter::spawn(
                Arc::clone(&self.store),
                self.config.batch_max_insert_size,
                self.config.batch_insert_timeout(),
                self.shutdown.clone(),
            )
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            Err(SchedulerError::Shutdown)
        } else {
            Ok(())
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut state_changes = self.store.factory().server_state().subscribe();
        debug!(target: "reel::scheduler", "scheduler loop running");

        while !self.shutdown.is_cancelled() {
            if self.is_in_standby() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.signal.notified() => {}
                    _ = tokio::time::sleep(STANDBY_POLL) => {}
                }
                continue;
            }

            let Some(permits) = self.reserve_workers().await else {
                break;
            };

            if let Err(err) = self.store.handle_misfires().await {
                error!(target: "reel::scheduler", error = %err, "misfire handling failed");
                drop(permits);
                self.back_off().await;
                continue;
            }

            let now = Utc::now();
            let no_later_than = chrono::Duration::from_std(self.config.idle_wait())
                .ok()
                .and_then(|idle| now.checked_add_signed(idle))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let triggers = match self
                .store
                .acquire_next_triggers(
                    no_later_than,
                    permits.len(),
                    self.config.batch_time_window(),
                )
                .await
            {
                Ok(triggers) => triggers,
                Err(err) => {
                    error!(target: "reel::scheduler", error = %err, "trigger acquisition failed");
                    drop(permits);
                    self.back_off().await;
                    continue;
                }
            };

            if triggers.is_empty() {
                drop(permits);
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.signal.notified() => {}
                    _ = state_changes.changed() => {}
                    _ = tokio::time::sleep(self.config.idle_wait()) => {}
                }
                continue;
            }

            if !self.wait_for_fire_time(&triggers).await {
                self.release_all(&triggers).await;
                continue;
            }

            let bundles = match self.store.triggers_fired(&triggers).await {
                Ok(bundles) => bundles,
                // Nothing in the batch fired.
                Err(err) => {
                    error!(target: "reel::scheduler", error = %err, "firing triggers failed");
                    self.release_all(&triggers).await;
                    self.back_off().await;
                    continue;
                }
            };

            for (bundle, permit) in bundles.into_iter().zip(permits) {
                self.spawn_job(bundle, permit);
            }
        }

        debug!(target: "reel::scheduler", "scheduler loop stopped");
    }

    /// One permit for each worker that is free right now, waiting for at
    /// least one. Bounded by the batch size. `None` on shutdown.
    async fn reserve_workers(&self) -> Option<Vec<OwnedSemaphorePermit>> {
        let first = tokio::select! {
            _ = self.shutdown.cancelled() => return None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok()?,
        };
        let mut permits = vec![first];
        while permits.len() < self.config.max_batch() {
            match Arc::clone(&self.workers).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        Some(permits)
    }

    /// Sleep until the earliest fire time of `triggers`. Returns `false`
    /// when the scheduler was paused or shut down in the meantime.
    async fn wait_for_fire_time(&self, triggers: &[Trigger]) -> bool {
        let first = triggers
            .iter()
            .filter_map(|trigger| trigger.next_fire_time)
            .min();
        if let Some(first) = first
            && let Ok(wait) = (first - Utc::now()).to_std()
        {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        !self.is_in_standby() && !self.shutdown.is_cancelled()
    }

    async fn release_all(&self, triggers: &[Trigger]) {
        for trigger in triggers {
            if let Err(err) = self.store.release_acquired_trigger(trigger).await {
                warn!(
                    target: "reel::scheduler",
                    trigger = %trigger.key,
                    error = %err,
                    "failed to release acquired trigger"
                );
            }
        }
    }

    async fn back_off(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.db_failure_retry_interval()) => {}
        }
    }

    fn spawn_job(self: &Arc<Self>, bundle: TriggerFiredBundle, permit: OwnedSemaphorePermit) {
        let scheduler = Arc::clone(self);
        self.jobs.spawn(async move {
            let _permit = permit;
            scheduler.run_job(bundle).await;
        });
    }

    async fn run_job(&self, bundle: TriggerFiredBundle) {
        let instruction = match self.store.factory().create_for_fired_trigger(&bundle) {
            Ok(mut job) => {
                let ctx = JobExecutionContext::new(
                    bundle.clone(),
                    Arc::clone(self.store.factory().services()),
                    Arc::clone(&self.store),
                    self.job_cancellation.child_token(),
                );
                match AssertUnwindSafe(job.process(&ctx)).catch_unwind().await {
                    Ok(Ok(())) => {
                        debug!(
                            target: "reel::scheduler",
                            job_key = %bundle.job.key,
                            trigger = %bundle.trigger.key,
                            "job finished"
                        );
                    }
                    Ok(Err(err)) => {
                        error!(
                            target: "reel::scheduler",
                            job_key = %bundle.job.key,
                            job_type = %bundle.job.job_type,
                            error = %format!("{err:#}"),
                            "job failed"
                        );
                    }
                    Err(_) => {
                        error!(
                            target: "reel::scheduler",
                            job_key = %bundle.job.key,
                            job_type = %bundle.job.job_type,
                            "job panicked"
                        );
                    }
                }
                CompletionInstruction::Completed
            }
            Err(_) => CompletionInstruction::SetTriggerError,
        };

        if let Err(err) = self.store.triggered_job_complete(&bundle, instruction).await {
            error!(
                target: "reel::scheduler",
                job_key = %bundle.job.key,
                trigger = %bundle.trigger.key,
                error = %err,
                "failed to complete fired trigger"
            );
        }
    }
}

