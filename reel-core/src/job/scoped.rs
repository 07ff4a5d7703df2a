use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{Instrument, debug};

use super::{Job, JobExecutionContext};

/// Runs the wrapped job inside its logger span and records how long it took.
#[derive(Debug)]
pub struct ScopedJob<J> {
    inner: J,
}

impl<J> ScopedJob<J> {
    pub fn new(inner: J) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> J {
        self.inner
    }
}

#[async_trait]
impl<J: Job + 'static> Job for ScopedJob<J> {
    fn type_name(&self) -> &str {
        self.inner.type_name()
    }

    fn title(&self) -> Option<String> {
        self.inner.title()
    }

    fn details(&self) -> BTreeMap<String, Value> {
        self.inner.details()
    }

    fn inner_mut(&mut self) -> Option<&mut dyn Job> {
        Some(&mut self.inner)
    }

    async fn process(&mut self, ctx: &JobExecutionContext) -> anyhow::Result<()> {
        let started = Instant::now();
        let span = ctx.logger().span().clone();
        let result = self.inner.process(ctx).instrument(span).await;
        debug!(
            target: "reel::job",
            job_key = %ctx.job_detail().key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "scoped job finished"
        );
        result
    }
}
