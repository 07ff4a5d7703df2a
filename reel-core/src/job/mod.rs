//! Job contract, type registry and construction.
//!
//! A job type is a serde-(de)serialisable struct: its fields are the job data
//! map, so applying the data map is a plain deserialisation. Shared services
//! (database pools, clients) reach the instance through [`JobServices`] in
//! [`Job::post_init`] and through the execution context.

mod context;
mod factory;
mod logger;
mod registry;
mod scoped;
mod services;

use std::collections::BTreeMap;

use async_trait::async_trait;
use reel_model::{DEFAULT_GROUP, JobBuilder, JobDataMap, JobDetail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::acquisition::JobRequirement;
use crate::concurrency::ConcurrencyDeclaration;
use crate::error::{Result, SchedulerError};

pub use context::JobExecutionContext;
pub use factory::JobFactory;
pub use logger::{JobLogger, logger_name};
pub use registry::{JobRegistration, JobRegistry};
pub use scoped::ScopedJob;
pub use services::JobServices;

/// A runnable unit of work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Registered type name.
    fn type_name(&self) -> &str;

    /// Human readable title for queue displays.
    fn title(&self) -> Option<String> {
        None
    }

    fn details(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// Called once after construction, only while the database is
    /// available.
    fn post_init(&mut self, _services: &JobServices) {}

    fn attach_logger(&mut self, _logger: JobLogger) {}

    /// Wrapper types return the job they wrap so construction hooks reach
    /// the object carrying the business logic.
    fn inner_mut(&mut self) -> Option<&mut dyn Job> {
        None
    }

    async fn process(&mut self, ctx: &JobExecutionContext) -> anyhow::Result<()>;
}

/// Static description of a job type, used to register it.
pub trait JobType: Job + Serialize + DeserializeOwned + Sized + 'static {
    const TYPE_NAME: &'static str;

    /// Group of the keys generated for this type.
    const GROUP: &'static str = DEFAULT_GROUP;

    const DURABLE: bool = false;

    const REQUESTS_RECOVERY: bool = false;

    fn concurrency() -> ConcurrencyDeclaration {
        ConcurrencyDeclaration::unlimited()
    }

    fn requirements() -> Vec<JobRequirement> {
        Vec::new()
    }
}

/// Build a job of type `T` from a data map.
pub fn from_data<T: DeserializeOwned>(data: &JobDataMap) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(data.clone()))?)
}

/// Data map of a configured job instance.
pub fn to_data<T: Serialize>(job: &T) -> Result<JobDataMap> {
    match serde_json::to_value(job)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(JobDataMap::new()),
        other => Err(SchedulerError::InvalidArgument(format!(
            "job data must serialize to an object, got {other}"
        ))),
    }
}

/// Definition of a configured job instance with generated identity.
pub fn job_detail<T: JobType>(job: &T) -> Result<JobDetail> {
    Ok(JobBuilder::new(T::TYPE_NAME)
        .in_group(T::GROUP)
        .using_job_data(to_data(job)?)
        .with_generated_identity()
        .store_durably(T::DURABLE)
        .request_recovery(T::REQUESTS_RECOVERY)
        .disallow_concurrent_execution(T::concurrency().disallow_concurrent)
        .build())
}
