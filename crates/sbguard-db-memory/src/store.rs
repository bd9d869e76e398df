use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sbguard_core::{BanRow, GroupRow, Identity, RosterRows};
use sbguard_verify::{BanQuery, RosterQuery, Store, StoreError, StoreResult};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use crate::Result;
use crate::fixture::{Fixture, StoredAdmin};

/// In-memory [`Store`] for development, demos and tests.
///
/// This store provides:
/// - Roster filtering by server assignment and web panel login
/// - Ban lookup by identity or address, skipping lifted and expired bans
/// - Outage and latency injection to exercise the engine's retry paths
#[derive(Debug)]
pub struct MemoryStore {
    groups: RwLock<Vec<GroupRow>>,
    admins: RwLock<Vec<StoredAdmin>>,
    bans: DashMap<u64, BanRow>,
    next_ban_id: AtomicU64,
    available: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(Vec::new()),
            admins: RwLock::new(Vec::new()),
            bans: DashMap::new(),
            next_ban_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Creates a store seeded with `fixture`.
    pub fn from_fixture(fixture: Fixture) -> Self {
        let next_ban_id = fixture.bans.iter().map(|b| b.ban_id).max().unwrap_or(0) + 1;
        let store = Self {
            groups: RwLock::new(fixture.groups),
            admins: RwLock::new(fixture.admins),
            next_ban_id: AtomicU64::new(next_ban_id),
            ..Self::new()
        };
        for ban in fixture.bans {
            store.bans.insert(ban.ban_id, ban);
        }
        store
    }

    /// Creates a store seeded from a JSON fixture file.
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::from_fixture(Fixture::from_path(path)?))
    }

    // ==================== Fault injection ====================

    /// Simulate the store going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        debug!(available, "Memory store availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of store calls served or refused so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    // ==================== Data ====================

    pub async fn add_group(&self, group: GroupRow) {
        self.groups.write().await.push(group);
    }

    pub async fn add_admin(&self, admin: StoredAdmin) {
        self.admins.write().await.push(admin);
    }

    /// Record a new ban and return its id. `length_minutes == 0` is permanent.
    pub fn add_ban(
        &self,
        identity: Option<Identity>,
        address: Option<IpAddr>,
        reason: impl Into<String>,
        length_minutes: u32,
    ) -> u64 {
        let ban_id = self.next_ban_id.fetch_add(1, Ordering::SeqCst);
        self.bans.insert(
            ban_id,
            BanRow {
                ban_id,
                identity,
                address,
                reason: reason.into(),
                created_at: OffsetDateTime::now_utc(),
                length_minutes,
                removed_at: None,
            },
        );
        ban_id
    }

    /// Lift a ban. Returns `false` if it does not exist or was already lifted.
    pub fn lift_ban(&self, ban_id: u64) -> bool {
        match self.bans.get_mut(&ban_id) {
            Some(mut ban) if ban.removed_at.is_none() => {
                ban.removed_at = Some(OffsetDateTime::now_utc());
                true
            }
            _ => false,
        }
    }

    pub fn ban(&self, ban_id: u64) -> Option<BanRow> {
        self.bans.get(&ban_id).map(|ban| ban.value().clone())
    }

    pub fn ban_count(&self) -> usize {
        self.bans.len()
    }

    /// Apply injected latency and availability to one call.
    async fn begin_call(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_roster(&self, query: &RosterQuery) -> StoreResult<RosterRows> {
        self.begin_call().await?;

        let groups = self.groups.read().await.clone();
        let admins = self
            .admins
            .read()
            .await
            .iter()
            .filter(|admin| admin.visible_to(query.server_id, query.require_site_login))
            .map(|admin| admin.row.clone())
            .collect();

        Ok(RosterRows { groups, admins })
    }

    async fn check_ban(&self, query: &BanQuery) -> StoreResult<Vec<BanRow>> {
        self.begin_call().await?;

        let now = OffsetDateTime::now_utc();
        let mut rows = Vec::new();
        for mut ban in self.bans.iter_mut() {
            if !ban.matches(&query.identity, query.address) || !ban.is_active(now) {
                continue;
            }
            // Remember the address the banned identity connected from.
            if ban.address.is_none() && query.address.is_some() {
                debug!(ban_id = ban.ban_id, identity = %query.identity, "Recording address on ban");
                ban.address = query.address;
            }
            rows.push(ban.value().clone());
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows)
    }
}
