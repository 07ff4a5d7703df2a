use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;

/// Live availability of the infrastructure jobs depend on.
///
/// Every change bumps a version on a watch channel; the scheduler subscribes
/// to it and re-runs acquisition immediately.
pub struct ServerState {
    database_available: AtomicBool,
    network_available: AtomicBool,
    unavailable_services: RwLock<BTreeSet<String>>,
    changes: watch::Sender<u64>,
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerState")
            .field("database_available", &self.database_available())
            .field("network_available", &self.network_available())
            .field("unavailable_services", &*self.unavailable_services.read())
            .finish()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Everything available.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            database_available: AtomicBool::new(true),
            network_available: AtomicBool::new(true),
            unavailable_services: RwLock::new(BTreeSet::new()),
            changes,
        }
    }

    pub fn database_available(&self) -> bool {
        self.database_available.load(Ordering::Acquire)
    }

    pub fn network_available(&self) -> bool {
        self.network_available.load(Ordering::Acquire)
    }

    pub fn service_available(&self, service: &str) -> bool {
        !self.unavailable_services.read().contains(service)
    }

    pub fn set_database_available(&self, available: bool) {
        if self.database_available.swap(available, Ordering::AcqRel)
            != available
        {
            info!(target: "reel::state", available, "database availability changed");
            self.bump();
        }
    }

    pub fn set_network_available(&self, available: bool) {
        if self.network_available.swap(available, Ordering::AcqRel) != available
        {
            info!(target: "reel::state", available, "network availability changed");
            self.bump();
        }
    }

    /// Mark an upstream service (e.g. a rate-limited API) as usable or not.
    pub fn set_service_available(&self, service: &str, available: bool) {
        let changed = {
            let mut services = self.unavailable_services.write();
            if available {
                services.remove(service)
            } else {
                services.insert(service.to_owned())
            }
        };
        if changed {
            info!(target: "reel::state", service, available, "service availability changed");
            self.bump();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_real_changes_notify() {
        let state = ServerState::new();
        let mut rx = state.subscribe();

        state.set_database_available(true);
        assert!(!rx.has_changed().expect("sender alive"));

        state.set_database_available(false);
        assert!(rx.has_changed().expect("sender alive"));
        rx.mark_unchanged();

        state.set_service_available("anidb-udp", false);
        state.set_service_available("anidb-udp", false);
        assert_eq!(*rx.borrow_and_update(), 2);
        assert!(!state.service_available("anidb-udp"));
    }
}
