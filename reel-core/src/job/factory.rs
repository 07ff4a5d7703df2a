use std::fmt;
use std::sync::Arc;

use reel_model::{JobDetail, JobKey};
use tracing::{error, warn};

use super::{
    Job, JobLogger, JobRegistry, JobServices, JobType, from_data, job_detail,
};
use crate::acquisition::ServerState;
use crate::error::{Result, SchedulerError};
use crate::store::TriggerFiredBundle;

/// Builds job instances for fired triggers, standalone use and queue
/// displays.
pub struct JobFactory {
    registry: Arc<JobRegistry>,
    services: Arc<JobServices>,
    state: Arc<ServerState>,
}

impl fmt::Debug for JobFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFactory")
            .field("registered_types", &self.registry.len())
            .field("services", &self.services)
            .finish()
    }
}

impl JobFactory {
    pub fn new(
        registry: Arc<JobRegistry>,
        services: Arc<JobServices>,
        state: Arc<ServerState>,
    ) -> Self {
        Self {
            registry,
            services,
            state,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<JobServices> {
        &self.services
    }

    pub fn server_state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Instance for a fired trigger. Failures are logged and returned.
    pub fn create_for_fired_trigger(
        &self,
        bundle: &TriggerFiredBundle,
    ) -> Result<Box<dyn Job>> {
        self.build(&bundle.job).inspect_err(|err| {
            error!(
                target: "reel::factory",
                job_key = %bundle.job.key,
                job_type = %bundle.job.job_type,
                trigger = %bundle.trigger.key,
                error = %err,
                "failed to create job for fired trigger"
            );
        })
    }

    /// Instance used only for introspection (titles, details). Failures are
    /// logged and yield `None`.
    pub fn create_job(&self, detail: &JobDetail) -> Option<Box<dyn Job>> {
        match self.build(detail) {
            Ok(job) => Some(job),
            Err(err) => {
                warn!(
                    target: "reel::factory",
                    job_key = %detail.key,
                    job_type = %detail.job_type,
                    error = %err,
                    "could not create job for display"
                );
                None
            }
        }
    }

    /// Build a `T` outside any trigger, e.g. to run it inline or to derive
    /// its definition. The instance gets a generated identity.
    pub fn create_standalone<T, F>(&self, configure: F) -> Result<T>
    where
        T: JobType,
        F: FnOnce(&mut T),
    {
        let mut job: T = from_data(&Default::default())?;
        configure(&mut job);
        let detail = job_detail(&job)?;
        self.prepare(&mut job, &detail.key);
        Ok(job)
    }

    fn build(&self, detail: &JobDetail) -> Result<Box<dyn Job>> {
        let mut job = self
            .registry
            .construct(&detail.job_type, &detail.data)
            .map_err(|err| match err {
                SchedulerError::JobTypeNotFound(_) => err,
                other => SchedulerError::JobConstruction {
                    key: detail.key.clone(),
                    job_type: detail.job_type.clone(),
                    reason: other.to_string(),
                },
            })?;
        self.prepare(job.as_mut(), &detail.key);
        Ok(job)
    }

    fn prepare(&self, job: &mut dyn Job, key: &JobKey) {
        if let Some(inner) = job.inner_mut() {
            self.prepare(inner, key);
            return;
        }

        job.attach_logger(JobLogger::for_key(key));
        if self.state.database_available() {
            job.post_init(&self.services);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::job::{JobExecutionContext, ScopedJob};

    #[derive(Debug, Default)]
    struct InitCounter(AtomicUsize);

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct HashFile {
        path: String,
        force: bool,
        #[serde(skip)]
        logger: Option<String>,
        #[serde(skip)]
        initialised: bool,
    }

    #[async_trait]
    impl Job for HashFile {
        fn type_name(&self) -> &str {
            Self::TYPE_NAME
        }

        fn title(&self) -> Option<String> {
            Some(format!("Hashing {}", self.path))
        }

        fn post_init(&mut self, services: &JobServices) {
            if let Some(counter) = services.get::<InitCounter>() {
                counter.0.fetch_add(1, Ordering::SeqCst);
            }
            self.initialised = true;
        }

        fn attach_logger(&mut self, logger: JobLogger) {
            self.logger = Some(logger.name().to_owned());
        }

        async fn process(
            &mut self,
            _ctx: &JobExecutionContext,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl JobType for HashFile {
        const TYPE_NAME: &'static str = "HashFile";
        const GROUP: &'static str = "Import";
    }

    fn factory(state: Arc<ServerState>) -> (JobFactory, Arc<InitCounter>) {
        let counter = Arc::new(InitCounter::default());
        let mut registry = JobRegistry::new();
        registry.register::<HashFile>();
        let services = JobServices::new().with(Arc::clone(&counter));
        (
            JobFactory::new(Arc::new(registry), Arc::new(services), state),
            counter,
        )
    }

    #[test]
    fn standalone_job_gets_identity_logger_and_post_init() {
        let (factory, counter) = factory(Arc::new(ServerState::new()));
        let job = factory
            .create_standalone::<HashFile, _>(|job| {
                job.path = "/anime/a.mkv".into();
            })
            .expect("standalone job");

        assert_eq!(
            job.logger.as_deref(),
            Some("Import.HashFile(force=false, path=|anime|a.mkv)")
        );
        assert!(job.initialised);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_init_is_skipped_without_database() {
        let state = Arc::new(ServerState::new());
        state.set_database_available(false);
        let (factory, counter) = factory(state);

        let job = factory
            .create_standalone::<HashFile, _>(|_| {})
            .expect("standalone job");
        assert!(!job.initialised);
        assert!(job.logger.is_some());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_type_yields_none_for_display() {
        let (factory, _) = factory(Arc::new(ServerState::new()));
        let detail = reel_model::JobBuilder::new("Missing")
            .with_name("missing")
            .build();
        assert!(factory.create_job(&detail).is_none());
    }

    #[test]
    fn wrapper_forwards_construction_hooks_to_inner_job() {
        let counter = Arc::new(InitCounter::default());
        let mut registry = JobRegistry::new();
        registry.register_wrapped::<HashFile, _, _>(ScopedJob::new);
        let factory = JobFactory::new(
            Arc::new(registry),
            Arc::new(JobServices::new().with(Arc::clone(&counter))),
            Arc::new(ServerState::new()),
        );

        let detail = crate::job::job_detail(&HashFile {
            path: "/b".into(),
            ..HashFile::default()
        })
        .expect("detail");
        let job = factory.create_job(&detail).expect("job");

        assert_eq!(job.type_name(), "HashFile");
        assert_eq!(job.title().as_deref(), Some("Hashing /b"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
