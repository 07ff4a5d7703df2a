use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::keys::{DEFAULT_GROUP, JobKey};

/// Key/value payload handed to a job when it is constructed.
pub type JobDataMap = serde_json::Map<String, Value>;

/// Persisted definition of a unit of work. Immutable once built; the store
/// replaces whole definitions rather than mutating them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    /// Registered job-type name used to resolve a constructor.
    pub job_type: String,
    pub description: Option<String>,
    pub data: JobDataMap,
    /// Durable jobs survive the removal of their last trigger.
    pub durable: bool,
    /// Interrupted executions are re-run after a restart.
    pub requests_recovery: bool,
    pub concurrent_execution_disallowed: bool,
}

/// Deterministic identity name for a job of `job_type` carrying `data`.
///
/// Keys are sorted and `null` values skipped, so two submissions with the
/// same payload resolve to the same key. Strings are rendered without quotes.
pub fn job_identity(job_type: &str, data: &JobDataMap) -> String {
    let mut entries: Vec<(&String, &Value)> =
        data.iter().filter(|(_, value)| !value.is_null()).collect();
    if entries.is_empty() {
        return job_type.to_owned();
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let rendered = entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{job_type}({rendered})")
}

#[derive(Debug, Clone)]
enum Identity {
    Random,
    Generated,
    Named(String),
    Key(JobKey),
}

/// Fluent builder for [`JobDetail`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    job_type: String,
    identity: Identity,
    group: String,
    description: Option<String>,
    data: JobDataMap,
    durable: bool,
    requests_recovery: bool,
    concurrent_execution_disallowed: bool,
}

impl JobBuilder {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            identity: Identity::Random,
            group: DEFAULT_GROUP.to_owned(),
            description: None,
            data: JobDataMap::new(),
            durable: false,
            requests_recovery: false,
            concurrent_execution_disallowed: false,
        }
    }

    pub fn with_identity(mut self, key: JobKey) -> Self {
        self.identity = Identity::Key(key);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.identity = Identity::Named(name.into());
        self
    }

    /// Derive the key name from the job type and data map at build time.
    pub fn with_generated_identity(mut self) -> Self {
        self.identity = Identity::Generated;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn using_job_data(mut self, data: JobDataMap) -> Self {
        self.data.extend(data);
        self
    }

    pub fn set_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn store_durably(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn request_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    pub fn disallow_concurrent_execution(mut self, disallowed: bool) -> Self {
        self.concurrent_execution_disallowed = disallowed;
        self
    }

    pub fn build(self) -> JobDetail {
        let key = match self.identity {
            Identity::Key(key) => key,
            Identity::Named(name) => JobKey::new(name, self.group),
            Identity::Generated => {
                JobKey::new(job_identity(&self.job_type, &self.data), self.group)
            }
            Identity::Random => {
                JobKey::new(Uuid::new_v4().to_string(), self.group)
            }
        };

        JobDetail {
            key,
            job_type: self.job_type,
            description: self.description,
            data: self.data,
            durable: self.durable,
            requests_recovery: self.requests_recovery,
            concurrent_execution_disallowed: self
                .concurrent_execution_disallowed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> JobDataMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn generated_identity_is_order_independent() {
        let a = data(json!({ "path": "/anime/a.mkv", "force": true }));
        let b = data(json!({ "force": true, "path": "/anime/a.mkv" }));
        assert_eq!(job_identity("HashFile", &a), job_identity("HashFile", &b));
        assert_eq!(
            job_identity("HashFile", &a),
            "HashFile(force=true, path=/anime/a.mkv)"
        );
    }

    #[test]
    fn generated_identity_skips_nulls_and_empty_maps() {
        let map = data(json!({ "optional": null }));
        assert_eq!(job_identity("Scan", &map), "Scan");
        assert_eq!(job_identity("Scan", &JobDataMap::new()), "Scan");
    }

    #[test]
    fn builder_applies_group_to_generated_key() {
        let detail = JobBuilder::new("HashFile")
            .in_group("Import")
            .set_data("path", json!("/a"))
            .with_generated_identity()
            .request_recovery(true)
            .build();

        assert_eq!(detail.key, JobKey::new("HashFile(path=/a)", "Import"));
        assert!(detail.requests_recovery);
        assert!(!detail.durable);
    }
}
