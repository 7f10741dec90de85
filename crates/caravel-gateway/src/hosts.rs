//! Destination host failover.
//!
//! The host list is immutable; failover advances an atomic cursor and the
//! next attempt binds a fresh client against the new current host. Tasks
//! share one list per worker, so a host that fails for one task is rotated
//! away for all of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An immutable list of destination hosts with a shared round-robin cursor.
#[derive(Debug, Clone)]
pub struct HostList {
    hosts: Arc<Vec<String>>,
    cursor: Arc<AtomicUsize>,
}

impl HostList {
    /// Creates a host list.
    ///
    /// # Panics
    ///
    /// Panics if `hosts` is empty; configuration validation rejects that
    /// before construction.
    #[must_use]
    pub fn new(hosts: Vec<String>) -> Self {
        assert!(!hosts.is_empty(), "host list must not be empty");
        Self { hosts: Arc::new(hosts), cursor: Arc::new(AtomicUsize::new(0)) }
    }

    /// The host the next attempt should use.
    #[must_use]
    pub fn current(&self) -> &str {
        &self.hosts[self.cursor.load(Ordering::SeqCst) % self.hosts.len()]
    }

    /// Rotates to the next host and returns it.
    pub fn advance(&self) -> &str {
        let next = self.cursor.fetch_add(1, Ordering::SeqCst) + 1;
        &self.hosts[next % self.hosts.len()]
    }

    /// Number of configured hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// A host list is never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}
