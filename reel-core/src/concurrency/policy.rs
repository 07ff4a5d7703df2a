//! Effective concurrency ceilings per job type.
//!
//! The table is computed once from the registered job types and the settings
//! override map. Changing overrides produces a new table through
//! [`ConcurrencyPolicy::with_overrides`]; an existing table never changes.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, warn};

/// Default ceiling for `ConcurrencyDeclaration::limited_default`.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Concurrency markers declared by a job type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConcurrencyDeclaration {
    /// At most one execution of the type at a time.
    pub disallow_concurrent: bool,
    /// Types sharing a group name never run concurrently with each other.
    pub group: Option<String>,
    pub limit: Option<ConcurrencyLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimit {
    pub max_concurrent: usize,
    /// Upper bound for runtime overrides. `None` leaves overrides unclamped.
    pub max_allowed: Option<usize>,
}

impl ConcurrencyDeclaration {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn disallow_concurrent() -> Self {
        Self {
            disallow_concurrent: true,
            ..Self::default()
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self {
            group: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn limited(max_concurrent: usize) -> Self {
        Self {
            limit: Some(ConcurrencyLimit {
                max_concurrent,
                max_allowed: None,
            }),
            ..Self::default()
        }
    }

    pub fn limited_default() -> Self {
        Self::limited(DEFAULT_MAX_CONCURRENT)
    }

    pub fn limited_with_max_allowed(
        max_concurrent: usize,
        max_allowed: usize,
    ) -> Self {
        Self {
            limit: Some(ConcurrencyLimit {
                max_concurrent,
                max_allowed: Some(max_allowed),
            }),
            ..Self::default()
        }
    }
}

/// Accounting unit a ceiling applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConcurrencyBucket {
    Type(String),
    Group(String),
}

impl fmt::Display for ConcurrencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyBucket::Type(name) => write!(f, "type:{name}"),
            ConcurrencyBucket::Group(name) => write!(f, "group:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ceiling {
    Unlimited,
    Limited {
        bucket: ConcurrencyBucket,
        max: usize,
    },
}

impl Ceiling {
    pub fn bucket(&self) -> Option<&ConcurrencyBucket> {
        match self {
            Ceiling::Unlimited => None,
            Ceiling::Limited { bucket, .. } => Some(bucket),
        }
    }

    pub fn max(&self) -> Option<usize> {
        match self {
            Ceiling::Unlimited => None,
            Ceiling::Limited { max, .. } => Some(*max),
        }
    }
}

/// Immutable type name -> ceiling table.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyPolicy {
    declarations: HashMap<String, ConcurrencyDeclaration>,
    ceilings: HashMap<String, Ceiling>,
}

impl ConcurrencyPolicy {
    pub fn build<I, S>(declarations: I, overrides: &HashMap<String, usize>) -> Self
    where
        I: IntoIterator<Item = (S, ConcurrencyDeclaration)>,
        S: Into<String>,
    {
        let declarations: HashMap<String, ConcurrencyDeclaration> =
            declarations
                .into_iter()
                .map(|(name, decl)| (name.into(), decl))
                .collect();

        for type_name in overrides.keys() {
            if !declarations.contains_key(type_name) {
                debug!(
                    target: "reel::policy",
                    job_type = %type_name,
                    "ignoring concurrency override for unknown job type"
                );
            }
        }

        let ceilings = declarations
            .iter()
            .map(|(name, decl)| {
                let ceiling = resolve(name, decl, overrides.get(name).copied());
                (name.clone(), ceiling)
            })
            .collect();

        Self {
            declarations,
            ceilings,
        }
    }

    /// New table with the same declarations and a different override map.
    pub fn with_overrides(&self, overrides: &HashMap<String, usize>) -> Self {
        Self::build(self.declarations.clone(), overrides)
    }

    /// Ceiling for `job_type`. Unregistered types are unlimited.
    pub fn effective_ceiling(&self, job_type: &str) -> Ceiling {
        self.ceilings
            .get(job_type)
            .cloned()
            .unwrap_or(Ceiling::Unlimited)
    }

    pub fn limited_types(&self) -> impl Iterator<Item = (&str, &Ceiling)> {
        self.ceilings
            .iter()
            .filter(|(_, ceiling)| !matches!(ceiling, Ceiling::Unlimited))
            .map(|(name, ceiling)| (name.as_str(), ceiling))
    }
}

fn resolve(
    type_name: &str,
    decl: &ConcurrencyDeclaration,
    override_value: Option<usize>,
) -> Ceiling {
    if decl.disallow_concurrent {
        return Ceiling::Limited {
            bucket: ConcurrencyBucket::Type(type_name.to_owned()),
            max: 1,
        };
    }

    if let Some(group) = &decl.group {
        return Ceiling::Limited {
            bucket: ConcurrencyBucket::Group(group.clone()),
            max: 1,
        };
    }

    if let Some(requested) = override_value {
        let mut max = requested;
        if max == 0 {
            warn!(
                target: "reel::policy",
                job_type = %type_name,
                "concurrency override of 0 raised to 1"
            );
            max = 1;
        }
        if let Some(allowed) = decl.limit.and_then(|limit| limit.max_allowed)
            && allowed > 0
        {
            max = max.min(allowed);
        }
        return Ceiling::Limited {
            bucket: ConcurrencyBucket::Type(type_name.to_owned()),
            max,
        };
    }

    match decl.limit {
        Some(limit) => Ceiling::Limited {
            bucket: ConcurrencyBucket::Type(type_name.to_owned()),
            max: limit.max_concurrent.max(1),
        },
        None => Ceiling::Unlimited,
    }
}

/// Batch-local usage per bucket, seeded with in-flight executions.
#[derive(Debug)]
pub struct BucketLedger<'a> {
    policy: &'a ConcurrencyPolicy,
    usage: HashMap<ConcurrencyBucket, usize>,
}

impl<'a> BucketLedger<'a> {
    pub fn seeded<'t>(
        policy: &'a ConcurrencyPolicy,
        in_flight_types: impl IntoIterator<Item = &'t str>,
    ) -> Self {
        let mut ledger = Self {
            policy,
            usage: HashMap::new(),
        };
        for job_type in in_flight_types {
            ledger.admit(job_type);
        }
        ledger
    }

    pub fn has_capacity(&self, job_type: &str) -> bool {
        match self.policy.effective_ceiling(job_type) {
            Ceiling::Unlimited => true,
            Ceiling::Limited { bucket, max } => self.usage(&bucket) < max,
        }
    }

    pub fn admit(&mut self, job_type: &str) {
        if let Ceiling::Limited { bucket, .. } =
            self.policy.effective_ceiling(job_type)
        {
            *self.usage.entry(bucket).or_default() += 1;
        }
    }

    pub fn usage(&self, bucket: &ConcurrencyBucket) -> usize {
        self.usage.get(bucket).copied().unwrap_or(0)
    }

    /// Types whose bucket has no capacity left. A group member executing
    /// excludes every type in that group.
    pub fn saturated_types(&self) -> HashSet<String> {
        self.policy
            .limited_types()
            .filter(|(_, ceiling)| match ceiling {
                Ceiling::Limited { bucket, max } => self.usage(bucket) >= *max,
                Ceiling::Unlimited => false,
            })
            .map(|(name, _)| name.to_owned())
            .collect()
    }
}
