//! TTL cache for the admin roster and per-identity ban verdicts.
//!
//! Entries are never dropped when their TTL runs out. A lookup past expiry
//! still returns the value, flagged as stale, so the engine can keep serving
//! the last known-good state while a refresh is outstanding or failing.
//!
//! The roster lives behind an [`ArcSwapOption`] so host threads can read it
//! through a [`RosterView`] without locking; a reader sees either the previous
//! snapshot or the new one, never a mix. Verdicts are owned by the engine's
//! sequencer and need no synchronization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use sbguard_core::{AdminRecord, BanVerdict, Identity, Roster};
use tokio::time::Instant;

use crate::clock::Clock;

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    #[must_use]
    pub fn new(value: T, now: Instant, ttl: Duration) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// An entry that is already past its expiry.
    #[must_use]
    pub fn expired(value: T, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now.checked_sub(Duration::from_nanos(1)).unwrap_or(now),
        }
    }

    #[must_use]
    pub fn is_stale(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<T> {
    pub value: T,
    /// The TTL has elapsed; the value is only good as a fallback.
    pub stale: bool,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        !self.stale
    }
}

// =============================================================================
// Roster View
// =============================================================================

/// Cloneable, thread-safe read handle onto the current roster snapshot.
#[derive(Clone)]
pub struct RosterView {
    slot: Arc<ArcSwapOption<CacheEntry<Arc<Roster>>>>,
}

impl RosterView {
    /// The current snapshot, or `None` before the first successful load.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<Roster>> {
        self.slot.load().as_ref().map(|entry| Arc::clone(&entry.value))
    }

    /// Look up one admin in the current snapshot.
    #[must_use]
    pub fn admin(&self, identity: &Identity) -> Option<AdminRecord> {
        self.slot
            .load()
            .as_ref()
            .and_then(|entry| entry.value.get(identity).cloned())
    }
}

impl std::fmt::Debug for RosterView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterView")
            .field("admins", &self.snapshot().map(|r| r.len()))
            .finish()
    }
}

// =============================================================================
// Verification Cache
// =============================================================================

/// Statistics about the verification cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh verdict lookups.
    pub verdict_hits: u64,
    /// Stale verdict lookups served as fallback.
    pub verdict_stale_hits: u64,
    /// Verdict lookups with nothing cached.
    pub verdict_misses: u64,
    /// Verdicts dropped after outliving the stale grace period.
    pub verdict_evictions: u64,
    /// Verdict entries currently held.
    pub verdict_entries: usize,
    /// Number of roster snapshots installed.
    pub roster_version: u64,
    /// Admins in the current roster snapshot.
    pub roster_admins: usize,
}

/// TTL-bounded store of the admin roster and ban verdicts.
pub struct VerificationCache {
    clock: Arc<dyn Clock>,
    roster: Arc<ArcSwapOption<CacheEntry<Arc<Roster>>>>,
    verdicts: HashMap<Identity, CacheEntry<BanVerdict>>,
    /// How long past expiry a verdict is still returned before eviction.
    stale_grace: Duration,
    stats: CacheStats,
}

impl VerificationCache {
    /// Create an empty cache.
    ///
    /// # Arguments
    ///
    /// * `clock` - Time source for expiry
    /// * `stale_grace` - How long a stale verdict remains available as fallback
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, stale_grace: Duration) -> Self {
        Self {
            clock,
            roster: Arc::new(ArcSwapOption::empty()),
            verdicts: HashMap::new(),
            stale_grace,
            stats: CacheStats::default(),
        }
    }

    /// The current roster snapshot. `None` until a load has succeeded.
    #[must_use]
    pub fn get_roster(&self) -> Option<Lookup<Arc<Roster>>> {
        let now = self.clock.now();
        self.roster.load().as_ref().map(|entry| Lookup {
            value: Arc::clone(&entry.value),
            stale: entry.is_stale(now),
        })
    }

    /// Replace the roster snapshot and reset its expiry.
    pub fn set_roster(&mut self, roster: Arc<Roster>, ttl: Duration) {
        let entry = CacheEntry::new(roster, self.clock.now(), ttl);
        self.roster.store(Some(Arc::new(entry)));
        self.stats.roster_version += 1;
    }

    /// Install a roster that is stale from the start, such as one read back
    /// from disk. It serves as fallback until a load replaces it.
    pub fn seed_roster(&mut self, roster: Arc<Roster>) {
        let entry = CacheEntry::expired(roster, self.clock.now());
        self.roster.store(Some(Arc::new(entry)));
        self.stats.roster_version += 1;
    }

    /// A read handle onto the roster for other threads.
    #[must_use]
    pub fn roster_view(&self) -> RosterView {
        RosterView {
            slot: Arc::clone(&self.roster),
        }
    }

    /// Look up the verdict for `identity`.
    ///
    /// Verdicts that have been stale for longer than the grace period are
    /// evicted here and reported as missing.
    pub fn get_verdict(&mut self, identity: &Identity) -> Option<Lookup<BanVerdict>> {
        let now = self.clock.now();
        let Some(entry) = self.verdicts.get(identity) else {
            self.stats.verdict_misses += 1;
            return None;
        };

        if now > entry.expires_at + self.stale_grace {
            self.verdicts.remove(identity);
            self.stats.verdict_evictions += 1;
            self.stats.verdict_misses += 1;
            tracing::debug!(identity = %identity, "Evicted expired ban verdict");
            return None;
        }

        let stale = entry.is_stale(now);
        if stale {
            self.stats.verdict_stale_hits += 1;
        } else {
            self.stats.verdict_hits += 1;
        }
        Some(Lookup {
            value: entry.value.clone(),
            stale,
        })
    }

    /// Insert or refresh the verdict for one identity.
    pub fn set_verdict(&mut self, identity: Identity, verdict: BanVerdict, ttl: Duration) {
        let entry = CacheEntry::new(verdict, self.clock.now(), ttl);
        self.verdicts.insert(identity, entry);
    }

    /// Change the stale grace period for subsequent lookups.
    pub fn set_stale_grace(&mut self, stale_grace: Duration) {
        self.stale_grace = stale_grace;
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            verdict_entries: self.verdicts.len(),
            roster_admins: self
                .roster
                .load()
                .as_ref()
                .map_or(0, |entry| entry.value.len()),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use sbguard_core::{AdminFlags, AdminRecord};

    const TTL: Duration = Duration::from_secs(300);
    const GRACE: Duration = Duration::from_secs(3600);

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn roster_of(ids: &[&str]) -> Arc<Roster> {
        Arc::new(
            ids.iter()
                .map(|s| AdminRecord {
                    identity: id(s),
                    flags: AdminFlags::parse("b"),
                    immunity: 0,
                })
                .collect(),
        )
    }

    fn cache() -> (ManualClock, VerificationCache) {
        let clock = ManualClock::new();
        let cache = VerificationCache::new(Arc::new(clock.clone()), GRACE);
        (clock, cache)
    }

    #[test]
    fn test_roster_not_found_before_first_load() {
        let (_clock, cache) = cache();
        assert!(cache.get_roster().is_none());
        assert!(cache.roster_view().snapshot().is_none());
    }

    #[test]
    fn test_roster_fresh_then_stale() {
        let (clock, mut cache) = cache();
        cache.set_roster(roster_of(&["76561198000000001"]), TTL);

        let lookup = cache.get_roster().unwrap();
        assert!(lookup.is_fresh());
        assert_eq!(lookup.value.len(), 1);

        clock.advance(TTL + Duration::from_secs(1));
        let lookup = cache.get_roster().unwrap();
        assert!(lookup.stale);
        assert_eq!(lookup.value.len(), 1);
    }

    #[test]
    fn test_set_roster_resets_expiry() {
        let (clock, mut cache) = cache();
        cache.set_roster(roster_of(&["76561198000000001"]), TTL);
        clock.advance(TTL + Duration::from_secs(1));
        assert!(cache.get_roster().unwrap().stale);

        cache.set_roster(roster_of(&["76561198000000002"]), TTL);
        assert!(cache.get_roster().unwrap().is_fresh());
        assert_eq!(cache.stats().roster_version, 2);
    }

    #[test]
    fn test_seeded_roster_is_stale_until_replaced() {
        let (_clock, mut cache) = cache();
        cache.seed_roster(roster_of(&["76561198000000001"]));

        let lookup = cache.get_roster().unwrap();
        assert!(lookup.stale);
        assert_eq!(cache.roster_view().snapshot().unwrap().len(), 1);

        cache.set_roster(roster_of(&["76561198000000002"]), TTL);
        assert!(cache.get_roster().unwrap().is_fresh());
    }

    #[test]
    fn test_roster_view_sees_whole_snapshots() {
        let (_clock, mut cache) = cache();
        let view = cache.roster_view();

        let first = roster_of(&["76561198000000001", "76561198000000002"]);
        let second = roster_of(&["76561198000000003", "76561198000000004"]);

        cache.set_roster(Arc::clone(&first), TTL);
        let held = view.snapshot().unwrap();

        cache.set_roster(Arc::clone(&second), TTL);
        let latest = view.snapshot().unwrap();

        // A snapshot taken before the swap is unaffected by it.
        assert_eq!(*held, *first);
        assert_eq!(*latest, *second);
        assert!(view.admin(&id("76561198000000001")).is_none());
        assert!(view.admin(&id("76561198000000003")).is_some());
    }

    #[test]
    fn test_verdict_round_trip_with_ttl() {
        let (clock, mut cache) = cache();
        let alice = id("76561198000000001");
        let verdict = BanVerdict::banned("cheating");

        assert!(cache.get_verdict(&alice).is_none());

        cache.set_verdict(alice.clone(), verdict.clone(), TTL);
        let lookup = cache.get_verdict(&alice).unwrap();
        assert_eq!(lookup.value, verdict);
        assert!(!lookup.stale);

        clock.advance(TTL);
        assert!(!cache.get_verdict(&alice).unwrap().stale);

        clock.advance(Duration::from_secs(1));
        let lookup = cache.get_verdict(&alice).unwrap();
        assert_eq!(lookup.value, verdict);
        assert!(lookup.stale);
    }

    #[test]
    fn test_verdicts_expire_independently() {
        let (clock, mut cache) = cache();
        let alice = id("76561198000000001");
        let bob = id("76561198000000002");

        cache.set_verdict(alice.clone(), BanVerdict::clean(), Duration::from_secs(60));
        cache.set_verdict(bob.clone(), BanVerdict::clean(), Duration::from_secs(600));

        clock.advance(Duration::from_secs(120));
        assert!(cache.get_verdict(&alice).unwrap().stale);
        assert!(cache.get_verdict(&bob).unwrap().is_fresh());
    }

    #[test]
    fn test_verdict_evicted_after_grace() {
        let (clock, mut cache) = cache();
        let alice = id("76561198000000001");
        cache.set_verdict(alice.clone(), BanVerdict::clean(), TTL);

        clock.advance(TTL + GRACE);
        assert!(cache.get_verdict(&alice).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get_verdict(&alice).is_none());

        let stats = cache.stats();
        assert_eq!(stats.verdict_evictions, 1);
        assert_eq!(stats.verdict_entries, 0);
    }

    #[test]
    fn test_stats_counts_lookups() {
        let (clock, mut cache) = cache();
        let alice = id("76561198000000001");

        let _ = cache.get_verdict(&alice);
        cache.set_verdict(alice.clone(), BanVerdict::clean(), TTL);
        let _ = cache.get_verdict(&alice);
        clock.advance(TTL * 2);
        let _ = cache.get_verdict(&alice);

        let stats = cache.stats();
        assert_eq!(stats.verdict_misses, 1);
        assert_eq!(stats.verdict_hits, 1);
        assert_eq!(stats.verdict_stale_hits, 1);
        assert_eq!(stats.verdict_entries, 1);
    }
}
