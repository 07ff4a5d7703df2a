#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reel_core::acquisition::{JobRequirement, ServerState};
use reel_core::concurrency::ConcurrencyDeclaration;
use reel_core::job::{
    Job, JobExecutionContext, JobFactory, JobRegistry, JobServices, JobType,
};
use reel_core::queue::{QueueEventBus, QueueStateEventHandler};
use reel_core::store::{InMemoryBackend, JobStore, JobStoreOptions, TriggerBackend};
use reel_model::{JobBuilder, JobDetail, Trigger, TriggerBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Counts executions across all test job types.
#[derive(Debug, Default)]
pub struct RunCounter(pub AtomicUsize);

impl RunCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

macro_rules! test_job {
    ($name:ident, $type_name:literal, $concurrency:expr) => {
        test_job!($name, $type_name, $concurrency, Vec::new());
    };
    ($name:ident, $type_name:literal, $concurrency:expr, $requirements:expr) => {
        #[derive(Debug, Default, Serialize, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub target: String,
            #[serde(skip)]
            counter: Option<Arc<RunCounter>>,
        }

        #[async_trait]
        impl Job for $name {
            fn type_name(&self) -> &str {
                Self::TYPE_NAME
            }

            fn title(&self) -> Option<String> {
                Some(format!("{} {}", $type_name, self.target))
            }

            fn details(&self) -> BTreeMap<String, Value> {
                BTreeMap::from([(
                    "target".to_owned(),
                    Value::from(self.target.clone()),
                )])
            }

            fn post_init(&mut self, services: &JobServices) {
                self.counter = services.get::<RunCounter>();
            }

            async fn process(
                &mut self,
                _ctx: &JobExecutionContext,
            ) -> anyhow::Result<()> {
                if let Some(counter) = &self.counter {
                    counter.0.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }

        impl JobType for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn concurrency() -> ConcurrencyDeclaration {
                $concurrency
            }

            fn requirements() -> Vec<JobRequirement> {
                $requirements
            }
        }
    };
}

test_job!(SyncJob, "Sync", ConcurrencyDeclaration::limited(2));
test_job!(ReindexJob, "Reindex", ConcurrencyDeclaration::group("exclusive"));
test_job!(VacuumJob, "Vacuum", ConcurrencyDeclaration::group("exclusive"));
test_job!(PlainJob, "Plain", ConcurrencyDeclaration::unlimited());
test_job!(
    CappedJob,
    "Capped",
    ConcurrencyDeclaration::limited_with_max_allowed(2, 3)
);
test_job!(
    FetchJob,
    "Fetch",
    ConcurrencyDeclaration::unlimited(),
    vec![JobRequirement::Network]
);

pub fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry
        .register::<SyncJob>()
        .register::<ReindexJob>()
        .register::<VacuumJob>()
        .register::<PlainJob>()
        .register::<CappedJob>()
        .register::<FetchJob>();
    registry
}

#[derive(Debug)]
pub struct Harness {
    pub backend: Arc<dyn TriggerBackend>,
    pub state: Arc<ServerState>,
    pub counter: Arc<RunCounter>,
    pub store: Arc<JobStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()), HashMap::new())
    }

    pub fn with_overrides(overrides: HashMap<String, usize>) -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()), overrides)
    }

    pub fn with_backend(
        backend: Arc<dyn TriggerBackend>,
        overrides: HashMap<String, usize>,
    ) -> Self {
        let state = Arc::new(ServerState::new());
        let counter = Arc::new(RunCounter::default());
        let services = JobServices::new().with(Arc::clone(&counter));
        let factory = Arc::new(JobFactory::new(
            Arc::new(registry()),
            Arc::new(services),
            Arc::clone(&state),
        ));
        let events = Arc::new(QueueStateEventHandler::new(
            Arc::clone(&factory),
            QueueEventBus::default(),
        ));
        let options = JobStoreOptions {
            thread_count: 4,
            concurrency_overrides: overrides,
            ..JobStoreOptions::default()
        };
        let store = Arc::new(JobStore::new(
            Arc::clone(&backend),
            factory,
            events,
            options,
        ));
        Self {
            backend,
            state,
            counter,
            store,
        }
    }

    /// Store a one-shot job of `job_type` that became due a second ago.
    pub async fn add_due(&self, job_type: &str, name: &str) -> (JobDetail, Trigger) {
        let (job, trigger) = due_job(job_type, name);
        self.store
            .store_job_and_trigger(job.clone(), trigger.clone())
            .await
            .expect("store job");
        (job, trigger)
    }
}

pub fn due_job(job_type: &str, name: &str) -> (JobDetail, Trigger) {
    let job = JobBuilder::new(job_type)
        .with_name(name)
        .set_data("target", Value::from(name))
        .build();
    let trigger = TriggerBuilder::new()
        .for_job(job.key.clone())
        .start_at(Utc::now() - Duration::seconds(1))
        .build()
        .expect("trigger");
    (job, trigger)
}
