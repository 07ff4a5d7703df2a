//! Bridges store and scheduler callbacks into queue events.
//!
//! Holds the paused flag, the index of executing jobs and the most recent
//! counters. The index is replaced wholesale from the store's snapshot on
//! every executing/completed callback, so it never holds a job the store no
//! longer considers in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use reel_model::{
    JobDetail, QueueChangedEvent, QueueCounts, QueueEvent, QueueItem,
    QueueJobsAddedEvent, QueueStateContext,
};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::event_bus::{QueueEventBus, QueueEventPublisher};
use super::item::queue_item;
use crate::job::JobFactory;
use crate::store::TriggerFiredBundle;

pub struct QueueStateEventHandler {
    factory: Arc<JobFactory>,
    bus: QueueEventBus,
    paused: AtomicBool,
    executing: Mutex<HashMap<String, QueueItem>>,
    counts: Mutex<QueueCounts>,
}

impl fmt::Debug for QueueStateEventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueStateEventHandler")
            .field("paused", &self.is_paused())
            .field("executing", &self.executing.lock().len())
            .field("counts", &*self.counts.lock())
            .field("bus", &self.bus)
            .finish()
    }
}

impl QueueStateEventHandler {
    /// Starts paused; the scheduler reports when it starts running.
    pub fn new(factory: Arc<JobFactory>, bus: QueueEventBus) -> Self {
        Self {
            factory,
            bus,
            paused: AtomicBool::new(true),
            executing: Mutex::new(HashMap::new()),
            counts: Mutex::new(QueueCounts::default()),
        }
    }

    pub fn bus(&self) -> &QueueEventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Latest counters seen in any event.
    pub fn counts(&self) -> QueueCounts {
        *self.counts.lock()
    }

    /// Copy of the executing index, oldest first.
    pub fn executing_jobs(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> =
            self.executing.lock().values().cloned().collect();
        items.sort_by(|a, b| {
            a.start_time.cmp(&b.start_time).then_with(|| a.key.cmp(&b.key))
        });
        items
    }

    /// Running -> paused. Returns whether a transition (and event) happened.
    pub fn on_paused(&self) -> bool {
        if self
            .paused
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!(target: "reel::queue", "queue paused");
        self.bus.publish(QueueEvent::Paused {
            counts: self.counts(),
        });
        true
    }

    /// Paused -> running. Returns whether a transition (and event) happened.
    pub fn on_resumed(&self) -> bool {
        if self
            .paused
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!(target: "reel::queue", "queue started");
        self.bus.publish(QueueEvent::Started {
            counts: self.counts(),
        });
        true
    }

    pub fn on_jobs_added(&self, jobs: &[JobDetail], ctx: &QueueStateContext) {
        if jobs.is_empty() {
            return;
        }
        let started = Instant::now();
        let added = jobs
            .iter()
            .map(|job| queue_item(&self.factory, job, false, false, None))
            .collect();
        let counts = self.record_counts(ctx);

        self.bus.publish(QueueEvent::JobsAdded(QueueJobsAddedEvent {
            added,
            counts,
        }));
        trace!(
            target: "reel::queue",
            jobs = jobs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "published jobs added"
        );
    }

    pub fn on_jobs_executing(
        &self,
        bundles: &[TriggerFiredBundle],
        ctx: &QueueStateContext,
    ) {
        if bundles.is_empty() {
            return;
        }
        let snapshot: HashMap<String, QueueItem> = ctx
            .currently_executing
            .iter()
            .map(|item| (item.key.clone(), item.clone()))
            .collect();

        let added = bundles
            .iter()
            .map(|bundle| {
                let key = bundle.job.key.to_string();
                snapshot.get(&key).cloned().unwrap_or_else(|| {
                    queue_item(
                        &self.factory,
                        &bundle.job,
                        true,
                        false,
                        Some(bundle.fire_time),
                    )
                })
            })
            .collect();

        *self.executing.lock() = snapshot;
        let counts = self.record_counts(ctx);

        self.bus
            .publish(QueueEvent::ExecutingJobsChanged(QueueChangedEvent {
                added,
                removed: Vec::new(),
                executing: self.executing_jobs(),
                waiting: ctx.waiting.clone(),
                counts,
            }));
    }

    pub fn on_job_completed(&self, job: &JobDetail, ctx: &QueueStateContext) {
        let key = job.key.to_string();
        let mut snapshot: HashMap<String, QueueItem> = ctx
            .currently_executing
            .iter()
            .map(|item| (item.key.clone(), item.clone()))
            .collect();
        snapshot.remove(&key);

        let removed = {
            let mut executing = self.executing.lock();
            let previous = executing.remove(&key);
            *executing = snapshot;
            previous
        }
        .unwrap_or_else(|| queue_item(&self.factory, job, false, false, None));

        let counts = self.record_counts(ctx);
        self.bus
            .publish(QueueEvent::ExecutingJobsChanged(QueueChangedEvent {
                added: Vec::new(),
                removed: vec![QueueItem {
                    running: false,
                    ..removed
                }],
                executing: self.executing_jobs(),
                waiting: ctx.waiting.clone(),
                counts,
            }));
    }

    fn record_counts(&self, ctx: &QueueStateContext) -> QueueCounts {
        let counts = ctx.counts();
        *self.counts.lock() = counts;
        counts
    }
}
