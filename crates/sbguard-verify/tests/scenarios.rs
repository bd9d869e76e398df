//! End-to-end engine behaviour against scripted collaborators.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sbguard_config::SbguardConfig;
use sbguard_core::{AdminRow, BanRow, GroupRow, Identity, Roster, RosterRows, Session, SessionHandle};
use sbguard_verify::{
    AdminDirectory, Admission, BanQuery, Concern, Enforcement, ManualClock, RosterLoadState,
    RosterQuery, Store, StoreError, StoreResult, TokioClock, VerificationEngine,
};
use time::OffsetDateTime;

const PLAYER: &str = "76561198000000001";
const ADMIN: &str = "76561198000000002";

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Default)]
struct ScriptedStore {
    rosters: Mutex<VecDeque<StoreResult<RosterRows>>>,
    bans: Mutex<HashMap<Identity, VecDeque<StoreResult<Vec<BanRow>>>>>,
    roster_queries: Mutex<Vec<RosterQuery>>,
    ban_queries: Mutex<Vec<BanQuery>>,
    hang_bans: AtomicBool,
}

impl ScriptedStore {
    fn push_roster(&self, result: StoreResult<RosterRows>) {
        self.rosters.lock().push_back(result);
    }

    fn push_ban(&self, identity: &Identity, result: StoreResult<Vec<BanRow>>) {
        self.bans
            .lock()
            .entry(identity.clone())
            .or_default()
            .push_back(result);
    }

    fn roster_calls(&self) -> usize {
        self.roster_queries.lock().len()
    }

    fn ban_calls(&self) -> usize {
        self.ban_queries.lock().len()
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn load_roster(&self, query: &RosterQuery) -> StoreResult<RosterRows> {
        self.roster_queries.lock().push(query.clone());
        let next = self.rosters.lock().pop_front();
        next.unwrap_or_else(|| Ok(RosterRows::default()))
    }

    async fn check_ban(&self, query: &BanQuery) -> StoreResult<Vec<BanRow>> {
        self.ban_queries.lock().push(query.clone());
        if self.hang_bans.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let next = self
            .bans
            .lock()
            .get_mut(&query.identity)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
struct RecordingDirectory {
    applied: Mutex<Vec<Arc<Roster>>>,
}

impl AdminDirectory for RecordingDirectory {
    fn apply_roster(&self, roster: Arc<Roster>) {
        self.applied.lock().push(roster);
    }
}

#[derive(Default)]
struct RecordingEnforcement {
    disconnects: Mutex<Vec<(SessionHandle, String)>>,
    admits: Mutex<Vec<SessionHandle>>,
    calls: AtomicUsize,
}

impl Enforcement for RecordingEnforcement {
    fn disconnect(&self, session: SessionHandle, reason: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.disconnects.lock().push((session, reason.to_string()));
    }

    fn admit(&self, session: SessionHandle) {
        self.admits.lock().push(session);
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    engine: VerificationEngine,
    clock: ManualClock,
    store: Arc<ScriptedStore>,
    directory: Arc<RecordingDirectory>,
    enforcement: Arc<RecordingEnforcement>,
}

impl Harness {
    fn new(config: SbguardConfig) -> Self {
        let clock = ManualClock::new();
        let store = Arc::new(ScriptedStore::default());
        let directory = Arc::new(RecordingDirectory::default());
        let enforcement = Arc::new(RecordingEnforcement::default());
        let engine = VerificationEngine::new(
            config,
            store.clone(),
            directory.clone(),
            enforcement.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            engine,
            clock,
            store,
            directory,
            enforcement,
        }
    }

    /// Let spawned store calls and timers run, applying every completion
    /// until nothing more arrives.
    async fn settle(&mut self) -> usize {
        let mut applied = 0;
        let mut idle_rounds = 0;
        while idle_rounds < 5 {
            tokio::task::yield_now().await;
            match self.engine.poll() {
                0 => idle_rounds += 1,
                n => {
                    applied += n;
                    idle_rounds = 0;
                }
            }
        }
        applied
    }

    async fn advance(&mut self, duration: Duration) {
        self.clock.advance(duration);
        self.settle().await;
    }

    fn disconnects(&self) -> Vec<(SessionHandle, String)> {
        self.enforcement.disconnects.lock().clone()
    }
}

fn id(value: &str) -> Identity {
    Identity::parse(value).unwrap()
}

fn session(handle: u64, identity: &str) -> Session {
    Session::new(SessionHandle(handle), id(identity))
}

fn ban_row(identity: &str, reason: &str) -> BanRow {
    BanRow {
        ban_id: 1,
        identity: Some(id(identity)),
        address: None,
        reason: reason.to_string(),
        created_at: OffsetDateTime::now_utc() - time::Duration::hours(1),
        length_minutes: 0,
        removed_at: None,
    }
}

fn roster_rows() -> RosterRows {
    RosterRows {
        groups: vec![GroupRow {
            name: "Moderators".to_string(),
            flags: "bcd".to_string(),
            immunity: 50,
        }],
        admins: vec![AdminRow {
            identity: ADMIN.to_string(),
            group: Some("Moderators".to_string()),
            flags: "z".to_string(),
            immunity: 10,
        }],
    }
}

fn config_without_admins() -> SbguardConfig {
    let mut config = SbguardConfig::default();
    config.admins.enabled = false;
    config
}

// =============================================================================
// Roster loads
// =============================================================================

#[tokio::test]
async fn roster_failures_keep_one_timer_until_load_succeeds() {
    let mut h = Harness::new(SbguardConfig::default());
    h.store.push_roster(Err(StoreError::unavailable("connection refused")));
    h.store.push_roster(Err(StoreError::unavailable("connection refused")));
    h.store.push_roster(Ok(roster_rows()));

    assert!(h.engine.request_roster_reload());
    h.settle().await;
    assert_eq!(h.engine.roster_state(), RosterLoadState::Failed);
    assert_eq!(h.engine.armed_retries(), 1);

    // Second failure inside the retry window.
    h.advance(Duration::from_secs(10)).await;
    assert!(h.engine.request_roster_reload());
    h.settle().await;
    assert_eq!(h.engine.roster_state(), RosterLoadState::Failed);
    assert_eq!(h.engine.armed_retries(), 1);
    assert!(h.engine.roster_view().snapshot().is_none());

    h.advance(Duration::from_secs(45)).await;
    assert_eq!(h.store.roster_calls(), 3);
    assert_eq!(h.engine.roster_state(), RosterLoadState::Applied);
    assert_eq!(h.engine.armed_retries(), 0);

    let admin = h.engine.roster_view().admin(&id(ADMIN)).unwrap();
    assert_eq!(admin.immunity, 50);
    assert_eq!(admin.flags.to_string(), "bcdz");
    assert_eq!(h.directory.applied.lock().len(), 1);
}

#[tokio::test]
async fn failed_reload_keeps_last_roster() {
    let mut h = Harness::new(SbguardConfig::default());
    h.store.push_roster(Ok(roster_rows()));
    h.store.push_roster(Err(StoreError::internal("syntax error")));

    h.engine.request_roster_reload();
    h.settle().await;
    let first = h.engine.roster_view().snapshot().unwrap();

    h.engine.request_roster_reload();
    h.settle().await;
    assert_eq!(h.engine.roster_state(), RosterLoadState::Failed);
    assert!(h.engine.is_retry_armed(Concern::RosterLoad));

    let held = h.engine.roster_view().snapshot().unwrap();
    assert!(Arc::ptr_eq(&first, &held));
    assert_eq!(h.directory.applied.lock().len(), 1);
}

#[tokio::test]
async fn reload_requests_during_load_coalesce() {
    let mut h = Harness::new(SbguardConfig::default());

    assert!(h.engine.request_roster_reload());
    assert!(!h.engine.request_roster_reload());
    assert!(!h.engine.request_roster_reload());
    assert_eq!(h.engine.roster_state(), RosterLoadState::Loading);

    h.settle().await;
    assert_eq!(h.store.roster_calls(), 2);
    assert_eq!(h.directory.applied.lock().len(), 2);
    assert_eq!(h.engine.roster_state(), RosterLoadState::Applied);
}

#[tokio::test]
async fn reload_ignored_when_admins_disabled() {
    let mut h = Harness::new(config_without_admins());

    assert!(!h.engine.request_roster_reload());
    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 0);
    assert_eq!(h.engine.roster_state(), RosterLoadState::Idle);
}

#[tokio::test]
async fn admin_setting_changes_trigger_reload() {
    let mut config = SbguardConfig::default();
    config.admins.server_id = 1;
    let mut h = Harness::new(config.clone());

    h.engine.request_roster_reload();
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 1);

    // Messages only: no reload.
    let mut next = config.clone();
    next.messages.website = "https://bans.example.org".to_string();
    h.engine.apply_config(next.clone());
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 1);

    next.admins.server_id = 2;
    next.admins.require_site_login = true;
    h.engine.apply_config(next.clone());
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 2);
    let last = h.store.roster_queries.lock().last().cloned().unwrap();
    assert_eq!(
        last,
        RosterQuery {
            server_id: 2,
            require_site_login: true
        }
    );

    // Disabling admins does not reload.
    next.admins.enabled = false;
    h.engine.apply_config(next);
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 2);
}

#[tokio::test]
async fn players_never_trigger_roster_loads() {
    let mut h = Harness::new(SbguardConfig::default());

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 0);
    assert_eq!(h.engine.roster_state(), RosterLoadState::Idle);
}

#[tokio::test]
async fn stale_roster_refreshes_on_host_tick() {
    let mut h = Harness::new(SbguardConfig::default());
    assert!(h.engine.refresh_roster_if_stale());
    assert!(!h.engine.refresh_roster_if_stale());
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 1);

    h.advance(Duration::from_secs(120)).await;
    assert!(!h.engine.refresh_roster_if_stale());

    h.advance(Duration::from_secs(181)).await;
    h.engine.verify_player(session(2, ADMIN));
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 1);

    assert!(h.engine.refresh_roster_if_stale());
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 2);
    assert!(h.engine.cache().get_roster().unwrap().is_fresh());
}

#[tokio::test]
async fn refresh_waits_for_armed_roster_retry() {
    let mut h = Harness::new(SbguardConfig::default());
    h.store.push_roster(Err(StoreError::unavailable("down")));

    h.engine.refresh_roster_if_stale();
    h.settle().await;
    assert!(h.engine.is_retry_armed(Concern::RosterLoad));
    assert!(!h.engine.refresh_roster_if_stale());
    assert_eq!(h.store.roster_calls(), 1);
}

#[tokio::test]
async fn backed_up_roster_survives_restart_during_outage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("admins.json");
    let mut config = SbguardConfig::default();
    config.admins.backup_path = Some(path.clone());

    let mut first = Harness::new(config.clone());
    assert!(first.engine.cache().get_roster().is_none());
    first.store.push_roster(Ok(roster_rows()));
    first.engine.request_roster_reload();
    first.settle().await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("roster backup should be written");

    // Restart with the store down.
    let mut h = Harness::new(config);
    let seeded = h.engine.cache().get_roster().unwrap();
    assert!(seeded.stale);
    assert_eq!(h.directory.applied.lock().len(), 1);
    let admin = h.engine.roster_view().admin(&id(ADMIN)).unwrap();
    assert_eq!(admin.immunity, 50);
    assert_eq!(admin.flags.to_string(), "bcdz");

    h.store.push_roster(Err(StoreError::unavailable("connection refused")));
    h.engine.request_roster_reload();
    h.settle().await;
    assert_eq!(h.engine.roster_state(), RosterLoadState::Failed);
    assert!(h.engine.is_retry_armed(Concern::RosterLoad));
    assert!(h.engine.roster_view().admin(&id(ADMIN)).is_some());
    assert_eq!(h.directory.applied.lock().len(), 1);
}

#[tokio::test]
async fn unreadable_backup_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("admins.json");
    std::fs::write(&path, "not json").unwrap();
    let mut config = SbguardConfig::default();
    config.admins.backup_path = Some(path);

    let h = Harness::new(config);
    assert!(h.engine.cache().get_roster().is_none());
    assert!(h.directory.applied.lock().is_empty());
}

// =============================================================================
// Ban checks
// =============================================================================

#[tokio::test]
async fn banned_player_is_kicked_once_after_provisional_admission() {
    let mut config = config_without_admins();
    config.messages.website = "https://bans.example.org".to_string();
    let mut h = Harness::new(config);
    h.store.push_ban(&id(PLAYER), Ok(vec![ban_row(PLAYER, "aimbot")]));

    let admission = h.engine.verify_player(session(7, PLAYER));
    assert_eq!(admission, Admission::Provisional);
    assert!(h.engine.is_check_in_flight(&id(PLAYER)));

    h.settle().await;
    assert_eq!(h.store.ban_calls(), 1);
    assert_eq!(
        h.disconnects(),
        vec![(
            SessionHandle(7),
            "You have been banned by this server, check https://bans.example.org for more info"
                .to_string()
        )]
    );
    assert!(!h.engine.is_connected(&id(PLAYER)));

    // A later completion-free settle never kicks again.
    h.settle().await;
    assert_eq!(h.enforcement.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fresh_verdict_answers_without_store_call() {
    let mut h = Harness::new(config_without_admins());
    h.store.push_ban(&id(PLAYER), Ok(vec![ban_row(PLAYER, "aimbot")]));

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert_eq!(h.store.ban_calls(), 1);

    // Reconnect within the verdict TTL.
    h.advance(Duration::from_secs(60)).await;
    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Rejected);
    assert_eq!(h.engine.verify_player(session(3, ADMIN)), Admission::Provisional);
    h.settle().await;
    assert_eq!(h.engine.verify_player(session(4, ADMIN)), Admission::Allowed);

    assert_eq!(h.store.ban_calls(), 2);
    assert_eq!(h.disconnects().len(), 2);
    assert_eq!(h.disconnects()[1].0, SessionHandle(2));
}

#[tokio::test]
async fn fresh_verdict_skips_store_with_admins_enabled() {
    let mut config = SbguardConfig::default();
    config.verification.verdict_ttl_seconds = 600;
    let mut h = Harness::new(config);
    h.store.push_roster(Ok(roster_rows()));

    h.engine.request_roster_reload();
    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert_eq!(h.store.roster_calls(), 1);
    assert_eq!(h.store.ban_calls(), 1);

    // Roster is stale, the verdict is not.
    h.advance(Duration::from_secs(301)).await;
    assert!(h.engine.cache().get_roster().unwrap().stale);
    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Allowed);
    h.settle().await;

    assert_eq!(h.store.roster_calls(), 1);
    assert_eq!(h.store.ban_calls(), 1);
    assert_eq!(h.engine.roster_state(), RosterLoadState::Applied);
}

#[tokio::test]
async fn expired_verdict_triggers_recheck() {
    let mut h = Harness::new(config_without_admins());

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    h.advance(Duration::from_secs(301)).await;

    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Provisional);
    h.settle().await;
    assert_eq!(h.store.ban_calls(), 2);
    assert!(h.disconnects().is_empty());
}

#[tokio::test]
async fn failed_check_queues_identity_once() {
    let mut h = Harness::new(config_without_admins());
    let player = id(PLAYER);
    h.store.push_ban(&player, Err(StoreError::unavailable("timeout")));

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert!(h.engine.is_pending_recheck(&player));
    assert!(h.engine.is_retry_armed(Concern::BanRecheck));

    // Reconnect before the retry fires: still queued once, no new call.
    h.engine.player_disconnected(&player, SessionHandle(1));
    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Provisional);
    h.settle().await;
    assert_eq!(h.store.ban_calls(), 1);
    assert_eq!(h.engine.stats().pending_rechecks, 1);
    assert_eq!(h.engine.armed_retries(), 1);

    h.advance(Duration::from_secs(45)).await;
    assert_eq!(h.store.ban_calls(), 2);
    assert!(!h.engine.is_pending_recheck(&player));
    assert!(!h.engine.is_retry_armed(Concern::BanRecheck));
    assert!(h.disconnects().is_empty());
    assert_eq!(h.engine.verify_player(session(3, PLAYER)), Admission::Allowed);
}

#[tokio::test]
async fn recheck_drops_departed_players() {
    let mut h = Harness::new(config_without_admins());
    let player = id(PLAYER);
    h.store.push_ban(&player, Err(StoreError::unavailable("down")));

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert!(h.engine.player_disconnected(&player, SessionHandle(1)));

    h.advance(Duration::from_secs(45)).await;
    assert_eq!(h.store.ban_calls(), 1);
    assert_eq!(h.engine.stats().pending_rechecks, 0);
}

#[tokio::test]
async fn disconnect_before_completion_skips_enforcement() {
    let mut h = Harness::new(config_without_admins());
    let player = id(PLAYER);
    h.store.push_ban(&player, Ok(vec![ban_row(PLAYER, "griefing")]));

    h.engine.verify_player(session(1, PLAYER));
    assert!(h.engine.player_disconnected(&player, SessionHandle(1)));
    h.settle().await;

    assert!(h.disconnects().is_empty());
    assert_eq!(h.engine.stats().counters.ignored_completions, 1);
    // The verdict is still cached for the next connection.
    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Rejected);
}

#[tokio::test]
async fn disconnect_for_old_handle_is_ignored() {
    let mut h = Harness::new(config_without_admins());
    let player = id(PLAYER);

    h.engine.verify_player(session(1, PLAYER));
    h.engine.verify_player(session(2, PLAYER));
    assert!(!h.engine.player_disconnected(&player, SessionHandle(1)));
    assert!(h.engine.is_connected(&player));
    assert!(h.engine.player_disconnected(&player, SessionHandle(2)));
}

#[tokio::test]
async fn deferred_player_is_admitted_after_clean_verdict() {
    let mut config = config_without_admins();
    config.verification.allow_optimistic_admission = false;
    let mut h = Harness::new(config);

    assert_eq!(h.engine.verify_player(session(3, PLAYER)), Admission::Deferred);
    assert!(h.enforcement.admits.lock().is_empty());

    h.settle().await;
    assert_eq!(*h.enforcement.admits.lock(), vec![SessionHandle(3)]);
    assert_eq!(h.engine.verify_player(session(4, PLAYER)), Admission::Allowed);
}

#[tokio::test]
async fn stale_ban_is_enforced_when_store_fails() {
    let mut h = Harness::new(config_without_admins());
    let player = id(PLAYER);
    h.store.push_ban(&player, Ok(vec![ban_row(PLAYER, "cheating")]));
    h.store.push_ban(&player, Err(StoreError::unavailable("down")));

    h.engine.verify_player(session(1, PLAYER));
    h.settle().await;
    assert_eq!(h.disconnects().len(), 1);

    h.advance(Duration::from_secs(301)).await;
    assert_eq!(h.engine.verify_player(session(2, PLAYER)), Admission::Provisional);
    h.settle().await;

    assert_eq!(h.disconnects().len(), 2);
    assert_eq!(h.engine.stats().counters.stale_disconnects, 1);
    assert!(!h.engine.is_pending_recheck(&player));
}

#[tokio::test]
async fn hung_store_call_times_out_and_is_retried() {
    let mut config = config_without_admins();
    config.verification.store_timeout_seconds = 5;
    let mut h = Harness::new(config);
    h.store.hang_bans.store(true, Ordering::SeqCst);

    h.engine.verify_player(session(1, PLAYER));
    h.advance(Duration::from_secs(4)).await;
    assert!(h.engine.is_check_in_flight(&id(PLAYER)));

    h.advance(Duration::from_secs(1)).await;
    assert!(!h.engine.is_check_in_flight(&id(PLAYER)));
    assert_eq!(h.engine.stats().counters.ban_checks_failed, 1);
    assert!(h.engine.is_pending_recheck(&id(PLAYER)));
    assert!(h.engine.is_retry_armed(Concern::BanRecheck));
}

#[tokio::test]
async fn ban_query_carries_address_and_server() {
    let mut config = config_without_admins();
    config.admins.server_id = 12;
    let mut h = Harness::new(config);
    let address: IpAddr = "203.0.113.9".parse().unwrap();

    h.engine.verify_player(session(1, PLAYER).with_address(address));
    h.settle().await;

    let query = h.store.ban_queries.lock()[0].clone();
    assert_eq!(query.identity, id(PLAYER));
    assert_eq!(query.address, Some(address));
    assert_eq!(query.server_id, 12);
}

// =============================================================================
// Engine task
// =============================================================================

#[tokio::test]
async fn spawned_engine_serves_handle_commands() {
    let store = Arc::new(ScriptedStore::default());
    let directory = Arc::new(RecordingDirectory::default());
    let enforcement = Arc::new(RecordingEnforcement::default());
    store.push_roster(Ok(roster_rows()));
    store.push_ban(&id(PLAYER), Ok(vec![ban_row(PLAYER, "aimbot")]));

    let engine = VerificationEngine::new(
        SbguardConfig::default(),
        store.clone(),
        directory.clone(),
        enforcement.clone(),
        Arc::new(TokioClock),
    );
    let (handle, task) = engine.spawn();

    handle.reload_roster().await.unwrap();
    let admission = handle.verify(session(1, PLAYER)).await.unwrap();
    assert_eq!(admission, Admission::Provisional);

    tokio::time::timeout(Duration::from_secs(2), async {
        while enforcement.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("banned player should be disconnected");

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.counters.disconnects, 1);
    assert_eq!(stats.roster_state, RosterLoadState::Applied);
    assert!(handle.roster().admin(&id(ADMIN)).is_some());

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.reload_roster().await.is_err());
}
