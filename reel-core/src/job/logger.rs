use reel_model::JobKey;
use tracing::Span;

/// Logger name for a job: `group.name` with path separators replaced, so
/// file-path identities don't split into hierarchical logger segments.
pub fn logger_name(key: &JobKey) -> String {
    format!("{}.{}", key.group, key.name).replace(['/', '\\'], "|")
}

/// Per-job logging handle backed by a `tracing` span.
#[derive(Debug, Clone)]
pub struct JobLogger {
    name: String,
    span: Span,
}

impl JobLogger {
    pub fn for_key(key: &JobKey) -> Self {
        let name = logger_name(key);
        let span = tracing::info_span!(target: "reel::job", "job", logger = %name);
        Self { name, span }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, message: &str) {
        let _entered = self.span.enter();
        tracing::debug!(target: "reel::job", "{message}");
    }

    pub fn info(&self, message: &str) {
        let _entered = self.span.enter();
        tracing::info!(target: "reel::job", "{message}");
    }

    pub fn warn(&self, message: &str) {
        let _entered = self.span.enter();
        tracing::warn!(target: "reel::job", "{message}");
    }

    pub fn error(&self, message: &str) {
        let _entered = self.span.enter();
        tracing::error!(target: "reel::job", "{message}");
    }
}
