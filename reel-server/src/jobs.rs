//! Jobs shipped with the server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reel_core::concurrency::ConcurrencyDeclaration;
use reel_core::job::{Job, JobExecutionContext, JobRegistry, JobType};
use reel_model::QueueCounts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Register every built-in job type.
pub fn register_builtin(registry: &mut JobRegistry) {
    registry.register::<QueueSummaryJob>();
}

/// Logs the queue counters and the number of stored jobs per type.
/// Meant to be configured as a recurring job.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueSummaryJob {
    /// Optional tag included in the log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl JobType for QueueSummaryJob {
    const TYPE_NAME: &'static str = "QueueSummary";
    const DURABLE: bool = true;

    fn concurrency() -> ConcurrencyDeclaration {
        ConcurrencyDeclaration::disallow_concurrent()
    }
}

#[async_trait]
impl Job for QueueSummaryJob {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn title(&self) -> Option<String> {
        Some(match &self.label {
            Some(label) => format!("Queue summary ({label})"),
            None => "Queue summary".to_owned(),
        })
    }

    fn details(&self) -> BTreeMap<String, Value> {
        self.label
            .iter()
            .map(|label| ("label".to_owned(), Value::from(label.clone())))
            .collect()
    }

    async fn process(&mut self, ctx: &JobExecutionContext) -> anyhow::Result<()> {
        let store = ctx.store();
        let counts = store.events().counts();
        let per_type = store.job_counts().await?;
        let due = store.total_waiting_triggers_count().await?;

        let line = summarize(&counts, due, &per_type);
        info!(
            target: "reel::summary",
            label = self.label.as_deref().unwrap_or("-"),
            waiting = counts.waiting,
            blocked = counts.blocked,
            executing = counts.executing,
            due,
            "{line}"
        );
        ctx.logger().debug("queue summary logged");
        Ok(())
    }
}

/// One-line rendering of the queue state, e.g.
/// `due=3 waiting=2 blocked=1 executing=1/4 jobs[QueueSummary=1, Sync=3]`.
pub fn summarize(
    counts: &QueueCounts,
    due: usize,
    per_type: &BTreeMap<String, usize>,
) -> String {
    let jobs = per_type
        .iter()
        .map(|(job_type, count)| format!("{job_type}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "due={due} waiting={} blocked={} executing={}/{} jobs[{jobs}]",
        counts.waiting, counts.blocked, counts.executing, counts.thread_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_types_in_order() {
        let counts = QueueCounts {
            waiting: 2,
            blocked: 1,
            total: 4,
            executing: 1,
            thread_count: 4,
        };
        let per_type = BTreeMap::from([
            ("Sync".to_owned(), 3),
            ("QueueSummary".to_owned(), 1),
        ]);
        assert_eq!(
            summarize(&counts, 3, &per_type),
            "due=3 waiting=2 blocked=1 executing=1/4 jobs[QueueSummary=1, Sync=3]"
        );
    }

    #[test]
    fn label_feeds_title_and_details() {
        let job = QueueSummaryJob {
            label: Some("nightly".into()),
        };
        assert_eq!(job.title().as_deref(), Some("Queue summary (nightly)"));
        assert_eq!(job.details()["label"], "nightly");
        assert!(QueueSummaryJob::default().details().is_empty());
    }
}
