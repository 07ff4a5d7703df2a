use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use reel_model::JobDataMap;

use super::{Job, JobType, from_data};
use crate::acquisition::JobRequirement;
use crate::concurrency::{ConcurrencyDeclaration, ConcurrencyPolicy};
use crate::error::{Result, SchedulerError};

type Constructor =
    Arc<dyn Fn(&JobDataMap) -> Result<Box<dyn Job>> + Send + Sync>;

/// Everything the scheduler knows about a registered job type.
#[derive(Clone)]
pub struct JobRegistration {
    pub type_name: &'static str,
    pub group: &'static str,
    pub durable: bool,
    pub requests_recovery: bool,
    pub concurrency: ConcurrencyDeclaration,
    pub requirements: Vec<JobRequirement>,
    constructor: Constructor,
}

impl fmt::Debug for JobRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistration")
            .field("type_name", &self.type_name)
            .field("group", &self.group)
            .field("concurrency", &self.concurrency)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

impl JobRegistration {
    pub fn construct(&self, data: &JobDataMap) -> Result<Box<dyn Job>> {
        (self.constructor)(data)
    }
}

/// Type name -> constructor table. Stands in for a dependency-injection
/// container: resolution happens by registered name only.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    registrations: BTreeMap<&'static str, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: JobType>(&mut self) -> &mut Self {
        self.insert::<T>(Arc::new(|data: &JobDataMap| {
            Ok(Box::new(from_data::<T>(data)?) as Box<dyn Job>)
        }))
    }

    /// Register `T`, constructing each instance inside a wrapper job.
    pub fn register_wrapped<T, W, F>(&mut self, wrap: F) -> &mut Self
    where
        T: JobType,
        W: Job + 'static,
        F: Fn(T) -> W + Send + Sync + 'static,
    {
        self.insert::<T>(Arc::new(move |data: &JobDataMap| {
            Ok(Box::new(wrap(from_data::<T>(data)?)) as Box<dyn Job>)
        }))
    }

    fn insert<T: JobType>(&mut self, constructor: Constructor) -> &mut Self {
        self.registrations.insert(
            T::TYPE_NAME,
            JobRegistration {
                type_name: T::TYPE_NAME,
                group: T::GROUP,
                durable: T::DURABLE,
                requests_recovery: T::REQUESTS_RECOVERY,
                concurrency: T::concurrency(),
                requirements: T::requirements(),
                constructor,
            },
        );
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&JobRegistration> {
        self.registrations.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.registrations.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registrations.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Resolve `type_name` and apply `data` to a fresh instance.
    pub fn construct(
        &self,
        type_name: &str,
        data: &JobDataMap,
    ) -> Result<Box<dyn Job>> {
        self.get(type_name)
            .ok_or_else(|| SchedulerError::JobTypeNotFound(type_name.to_owned()))?
            .construct(data)
    }

    /// Ceiling table for the registered types.
    pub fn concurrency_policy(
        &self,
        overrides: &HashMap<String, usize>,
    ) -> ConcurrencyPolicy {
        ConcurrencyPolicy::build(
            self.registrations
                .values()
                .map(|reg| (reg.type_name, reg.concurrency.clone())),
            overrides,
        )
    }

    pub fn requirement_declarations(
        &self,
    ) -> Vec<(String, Vec<JobRequirement>)> {
        self.registrations
            .values()
            .filter(|reg| !reg.requirements.is_empty())
            .map(|reg| (reg.type_name.to_owned(), reg.requirements.clone()))
            .collect()
    }
}
