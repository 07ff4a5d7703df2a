use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reel_model::{JobDetail, Trigger};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, SchedulerError};
use crate::store::JobStore;

const SUBMISSION_CHANNEL_CAPACITY: usize = 4_096;

struct Submission {
    job: JobDetail,
    trigger: Trigger,
    done: oneshot::Sender<Result<()>>,
}

/// Collects `start_job` submissions and stores them in batches, flushing
/// when `max_batch` submissions are pending or the oldest has waited
/// `timeout`.
pub struct JobSubmitter {
    sender: mpsc::Sender<Submission>,
    max_batch: usize,
    timeout: Duration,
}

impl fmt::Debug for JobSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSubmitter")
            .field("max_batch", &self.max_batch)
            .field("timeout", &self.timeout)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl JobSubmitter {
    /// Spawns the flush task on the current runtime.
    pub fn spawn(
        store: Arc<JobStore>,
        max_batch: usize,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(SUBMISSION_CHANNEL_CAPACITY);
        tokio::spawn(run(store, receiver, max_batch.max(1), timeout, shutdown));
        Self {
            sender,
            max_batch,
            timeout,
        }
    }

    /// Queue a job for the next batch and wait until that batch is stored.
    pub async fn submit(&self, job: JobDetail, trigger: Trigger) -> Result<()> {
        let (done, outcome) = oneshot::channel();
        self.sender
            .send(Submission { job, trigger, done })
            .await
            .map_err(|_| SchedulerError::Shutdown)?;
        outcome.await.map_err(|_| SchedulerError::Shutdown)?
    }
}

async fn run(
    store: Arc<JobStore>,
    mut receiver: mpsc::Receiver<Submission>,
    max_batch: usize,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            biased;
            item = receiver.recv() => item,
            _ = shutdown.cancelled() => None,
        };
        let Some(first) = first else {
            break;
        };

        let mut pending = vec![first];
        let deadline = tokio::time::Instant::now() + timeout;
        while pending.len() < max_batch {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Some(item)) => pending.push(item),
                Ok(None) | Err(_) => break,
            }
        }
        flush(&store, pending).await;
    }

    receiver.close();
    let mut remaining = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        remaining.push(item);
    }
    if !remaining.is_empty() {
        flush(&store, remaining).await;
    }
    debug!(target: "reel::scheduler", "job submitter stopped");
}

async fn flush(store: &JobStore, pending: Vec<Submission>) {
    let (jobs, waiters): (Vec<_>, Vec<_>) = pending
        .into_iter()
        .map(|submission| ((submission.job, submission.trigger), submission.done))
        .unzip();

    let count = jobs.len();
    let outcome = store_submissions(store, jobs).await;
    trace!(
        target: "reel::scheduler",
        submissions = count,
        ok = outcome.is_ok(),
        "flushed job submissions"
    );

    let failure = outcome.err().map(|err| {
        warn!(target: "reel::scheduler", error = %err, "failed to store submitted jobs");
        err.to_string()
    });
    for waiter in waiters {
        let result = match &failure {
            None => Ok(()),
            Some(message) => Err(SchedulerError::Persistence(message.clone())),
        };
        let _ = waiter.send(result);
    }
}

/// Store submissions, skipping jobs that are already in flight, already
/// stored or repeated within the batch. Returns the number of new jobs.
pub(crate) async fn store_submissions(
    store: &JobStore,
    submissions: Vec<(JobDetail, Trigger)>,
) -> Result<usize> {
    let in_flight = store.in_flight_job_keys().await?;
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(submissions.len());

    for (job, trigger) in submissions {
        if in_flight.contains(&job.key) || !seen.insert(job.key.clone()) {
            debug!(
                target: "reel::scheduler",
                job_key = %job.key,
                "job already queued or executing; submission skipped"
            );
            continue;
        }
        if store.check_job_exists(&job.key).await? {
            debug!(
                target: "reel::scheduler",
                job_key = %job.key,
                "job already stored; submission skipped"
            );
            continue;
        }
        entries.push((job, vec![trigger]));
    }

    if entries.is_empty() {
        return Ok(0);
    }
    store.store_jobs_and_triggers(entries, true).await
}
