use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::requirement::JobRequirement;
use super::state::ServerState;

/// Pluggable veto over job types for a single acquisition cycle.
///
/// Implementations are consulted on every cycle while the store lock is
/// held: they must be side-effect free and must not block.
pub trait AcquisitionFilter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn types_to_exclude(&self) -> Vec<String>;
}

/// Ordered collection of filters whose exclusions are unioned.
#[derive(Clone, Default)]
pub struct AcquisitionFilterSet {
    filters: Vec<Arc<dyn AcquisitionFilter>>,
}

impl fmt::Debug for AcquisitionFilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

impl AcquisitionFilterSet {
    pub fn new(filters: Vec<Arc<dyn AcquisitionFilter>>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: Arc<dyn AcquisitionFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn excluded_types(&self) -> HashSet<String> {
        self.filters
            .iter()
            .flat_map(|filter| filter.types_to_exclude())
            .collect()
    }

    /// Exclusions per filter name, for introspection.
    pub fn results(&self) -> BTreeMap<String, Vec<String>> {
        self.filters
            .iter()
            .map(|filter| {
                let mut types = filter.types_to_exclude();
                types.sort();
                (filter.name().to_owned(), types)
            })
            .collect()
    }
}

/// Excludes the job types that declare `requirement` while the server
/// state says it is unmet.
#[derive(Debug)]
pub struct RequirementFilter {
    name: String,
    requirement: JobRequirement,
    job_types: Vec<String>,
    state: Arc<ServerState>,
}

impl RequirementFilter {
    pub fn new(
        requirement: JobRequirement,
        job_types: Vec<String>,
        state: Arc<ServerState>,
    ) -> Self {
        Self {
            name: requirement.filter_name(),
            requirement,
            job_types,
            state,
        }
    }

    /// One filter per distinct requirement declared by `declarations`.
    pub fn for_requirements<I>(
        declarations: I,
        state: &Arc<ServerState>,
    ) -> Vec<Arc<dyn AcquisitionFilter>>
    where
        I: IntoIterator<Item = (String, Vec<JobRequirement>)>,
    {
        let mut by_requirement: BTreeMap<JobRequirement, Vec<String>> =
            BTreeMap::new();
        for (job_type, requirements) in declarations {
            for requirement in requirements {
                by_requirement
                    .entry(requirement)
                    .or_default()
                    .push(job_type.clone());
            }
        }

        by_requirement
            .into_iter()
            .map(|(requirement, mut job_types)| {
                job_types.sort();
                Arc::new(Self::new(requirement, job_types, Arc::clone(state)))
                    as Arc<dyn AcquisitionFilter>
            })
            .collect()
    }
}

impl AcquisitionFilter for RequirementFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn types_to_exclude(&self) -> Vec<String> {
        if self.requirement.is_met(&self.state) {
            Vec::new()
        } else {
            self.job_types.clone()
        }
    }
}
