//! Wiring of the scheduler components from a loaded [`Config`].

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use reel_config::Config;
use reel_core::acquisition::ServerState;
use reel_core::job::{JobFactory, JobRegistry, JobServices};
use reel_core::queue::{QueueEventBus, QueueHandler, QueueStateEventHandler};
use reel_core::scheduler::Scheduler;
use reel_core::store::{JobStore, SqliteBackend};
use reel_model::QueueEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::jobs::register_builtin;

/// A scheduler over the configured SQLite store, plus the queue facade.
pub struct App {
    scheduler: Arc<Scheduler>,
    queue: QueueHandler,
    state: Arc<ServerState>,
    bus: QueueEventBus,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("scheduler", &self.scheduler)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Open and migrate the store and assemble the scheduler. Nothing runs
    /// until [`App::start`].
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let backend = SqliteBackend::connect(
            &config.database.url,
            config.database.max_connections,
        )
        .await
        .with_context(|| {
            format!("failed to open job store at {}", config.database.url)
        })?;
        backend
            .migrate()
            .await
            .context("failed to apply job store migrations")?;

        let mut registry = JobRegistry::new();
        register_builtin(&mut registry);

        let state = Arc::new(ServerState::new());
        let factory = Arc::new(JobFactory::new(
            Arc::new(registry),
            Arc::new(JobServices::new()),
            Arc::clone(&state),
        ));
        let bus = QueueEventBus::default();
        let events = Arc::new(QueueStateEventHandler::new(
            Arc::clone(&factory),
            bus.clone(),
        ));
        let store = Arc::new(JobStore::new(
            Arc::new(backend),
            factory,
            events,
            config.scheduler.store_options(),
        ));

        let scheduler = Scheduler::new(config.scheduler.clone(), store);
        let queue = QueueHandler::for_scheduler(Arc::clone(&scheduler));

        Ok(Self {
            scheduler,
            queue,
            state,
            bus,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn queue(&self) -> &QueueHandler {
        &self.queue
    }

    pub fn server_state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler
            .start()
            .await
            .context("failed to start scheduler")
    }

    pub async fn shutdown(&self, wait_for_jobs: bool) -> anyhow::Result<()> {
        self.scheduler
            .shutdown(wait_for_jobs)
            .await
            .context("scheduler shutdown failed")
    }

    /// Log every queue event until `shutdown` is cancelled.
    pub fn spawn_event_logger(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = Box::pin(self.bus.stream());
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.next() => event,
                };
                match event {
                    Some(event) => log_event(&event),
                    None => break,
                }
            }
        })
    }
}

fn log_event(event: &QueueEvent) {
    let counts = event.counts();
    match event {
        QueueEvent::Paused { .. } => {
            info!(target: "reel::queue", waiting = counts.waiting, "queue paused");
        }
        QueueEvent::Started { .. } => {
            info!(target: "reel::queue", waiting = counts.waiting, "queue started");
        }
        QueueEvent::JobsAdded(added) => {
            info!(
                target: "reel::queue",
                added = added.added.len(),
                waiting = counts.waiting,
                blocked = counts.blocked,
                "jobs added"
            );
        }
        QueueEvent::ExecutingJobsChanged(changed) => {
            info!(
                target: "reel::queue",
                started = changed.added.len(),
                finished = changed.removed.len(),
                executing = changed.executing.len(),
                waiting = counts.waiting,
                blocked = counts.blocked,
                total = counts.total,
                "executing jobs changed"
            );
        }
    }
}
