use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Typed service container handed to jobs.
#[derive(Clone, Default)]
pub struct JobServices {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for JobServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobServices")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl JobServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service`, replacing an earlier one of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), service);
    }

    pub fn with<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pool(&'static str);

    #[test]
    fn services_are_looked_up_by_type() {
        let services = JobServices::new().with(Arc::new(Pool("main")));
        assert_eq!(services.get::<Pool>().as_deref(), Some(&Pool("main")));
        assert!(services.get::<String>().is_none());
    }
}
