//! Identities waiting for a ban recheck after a failed Store call.

use indexmap::IndexSet;
use sbguard_core::Identity;

/// Deduplicated set of identities awaiting a ban recheck.
///
/// Insertion order is kept so rechecks go out in the order players failed.
#[derive(Debug, Clone, Default)]
pub struct PendingRecheckQueue {
    identities: IndexSet<Identity>,
}

impl PendingRecheckQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity. Returns `false` if it was already queued.
    pub fn enqueue(&mut self, identity: Identity) -> bool {
        self.identities.insert(identity)
    }

    /// Take every queued identity, leaving the queue empty.
    ///
    /// Identities enqueued after this call land in a fresh queue and are not
    /// part of the returned batch.
    pub fn drain_snapshot(&mut self) -> Vec<Identity> {
        std::mem::take(&mut self.identities).into_iter().collect()
    }

    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
