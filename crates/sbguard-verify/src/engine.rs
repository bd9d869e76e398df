//! The verification engine.
//!
//! [`VerificationEngine`] is the single owner of the cache, the roster load
//! state, the pending recheck queue and the session table. Store calls run on
//! spawned tasks; their results come back as [`EngineEvent`]s on an internal
//! channel and are applied one at a time by whoever drives the engine:
//!
//! - a host tick loop calling [`VerificationEngine::poll`],
//! - an async caller awaiting [`VerificationEngine::next_event`],
//! - or the engine's own task started with [`VerificationEngine::spawn`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use sbguard_config::SbguardConfig;
use sbguard_core::{BanRow, BanVerdict, Identity, Roster, RosterRows, Session, SessionHandle};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backup::RosterBackup;
use crate::cache::{CacheStats, RosterView, VerificationCache};
use crate::clock::Clock;
use crate::host::{AdminDirectory, Enforcement};
use crate::messages::BanMessages;
use crate::queue::PendingRecheckQueue;
use crate::retry::{Concern, FireNotifier, RetryScheduler, RetryStats, TimerFired};
use crate::store::{BanQuery, RosterQuery, Store, StoreError, StoreResult};

const COMMAND_BUFFER: usize = 256;

/// Completions delivered back to the engine's sequencer.
#[derive(Debug)]
pub enum EngineEvent {
    /// A roster load finished.
    RosterLoaded { result: StoreResult<RosterRows> },
    /// A ban lookup for `identity` finished.
    BanChecked {
        identity: Identity,
        result: StoreResult<Vec<BanRow>>,
    },
    /// A retry timer elapsed.
    RetryFired(TimerFired),
}

/// Where the roster load cycle currently is.
///
/// `Applied` and `Failed` are idle states that remember the last outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterLoadState {
    Idle,
    Loading,
    Applied,
    Failed,
}

/// What the host should do with a player that just connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A fresh verdict says the player is not banned.
    Allowed,
    /// A fresh verdict says the player is banned; they have been disconnected.
    Rejected,
    /// Let the player in for now; a ban check is outstanding.
    Provisional,
    /// Hold the player until [`Enforcement::admit`] is called.
    Deferred,
}

/// Counters for engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub roster_loads_issued: u64,
    pub roster_loads_applied: u64,
    pub roster_loads_failed: u64,
    pub ban_checks_issued: u64,
    pub ban_checks_succeeded: u64,
    pub ban_checks_failed: u64,
    pub disconnects: u64,
    /// Disconnects based on a stale verdict while the store was failing.
    pub stale_disconnects: u64,
    pub admits: u64,
    /// Completions that arrived after their player had left.
    pub ignored_completions: u64,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub counters: EngineCounters,
    pub cache: CacheStats,
    pub retries: RetryStats,
    pub roster_state: RosterLoadState,
    pub sessions: usize,
    pub pending_rechecks: usize,
    pub checks_in_flight: usize,
}

#[derive(Debug)]
struct ConnectedSession {
    session: Session,
    deferred: bool,
}

/// Orchestrates roster loads and ban checks against a [`Store`].
pub struct VerificationEngine {
    config: SbguardConfig,
    store: Arc<dyn Store>,
    directory: Arc<dyn AdminDirectory>,
    enforcement: Arc<dyn Enforcement>,
    clock: Arc<dyn Clock>,
    cache: VerificationCache,
    retries: RetryScheduler<VerificationEngine>,
    pending: PendingRecheckQueue,
    in_flight: HashSet<Identity>,
    sessions: HashMap<Identity, ConnectedSession>,
    roster_state: RosterLoadState,
    reload_queued: bool,
    messages: BanMessages,
    counters: EngineCounters,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl VerificationEngine {
    /// Create an engine.
    ///
    /// If `admins.backup_path` names a saved roster it is installed right
    /// away, marked stale. Nothing is read from the store until
    /// [`request_roster_reload`](Self::request_roster_reload) or
    /// [`refresh_roster_if_stale`](Self::refresh_roster_if_stale).
    pub fn new(
        config: SbguardConfig,
        store: Arc<dyn Store>,
        directory: Arc<dyn AdminDirectory>,
        enforcement: Arc<dyn Enforcement>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let timer_tx = events_tx.clone();
        let notify: FireNotifier = Arc::new(move |fired| {
            let _ = timer_tx.send(EngineEvent::RetryFired(fired));
        });

        let mut engine = Self {
            cache: VerificationCache::new(
                Arc::clone(&clock),
                config.verification.verdict_stale_grace(),
            ),
            retries: RetryScheduler::new(Arc::clone(&clock), notify),
            messages: BanMessages::from_config(&config.messages),
            config,
            store,
            directory,
            enforcement,
            clock,
            pending: PendingRecheckQueue::new(),
            in_flight: HashSet::new(),
            sessions: HashMap::new(),
            roster_state: RosterLoadState::Idle,
            reload_queued: false,
            counters: EngineCounters::default(),
            events_tx,
            events_rx,
        };
        engine.seed_from_backup();
        engine
    }

    // ==================== Roster ====================

    /// Ask for the admin roster to be reloaded.
    ///
    /// Returns `true` if a load was issued now. While a load is in flight the
    /// request is remembered and a single follow-up load runs once the current
    /// one succeeds. Ignored when admins are disabled.
    pub fn request_roster_reload(&mut self) -> bool {
        if !self.config.admins.enabled {
            debug!("Admins disabled, ignoring roster reload");
            return false;
        }
        if self.roster_state == RosterLoadState::Loading {
            debug!("Roster load in flight, queueing reload");
            self.reload_queued = true;
            return false;
        }
        self.start_roster_load();
        true
    }

    fn start_roster_load(&mut self) {
        // Loading now covers whatever the armed retry would have done.
        self.retries.cancel(Concern::RosterLoad);
        self.roster_state = RosterLoadState::Loading;
        self.counters.roster_loads_issued += 1;

        let query = RosterQuery {
            server_id: self.config.admins.server_id,
            require_site_login: self.config.admins.require_site_login,
        };
        debug!(
            server_id = query.server_id,
            require_site_login = query.require_site_login,
            "Loading admin roster"
        );

        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let limit = self.config.verification.store_timeout();
        let deadline = self.clock.sleep(limit);
        tokio::spawn(async move {
            let result = bounded(limit, deadline, store.load_roster(&query)).await;
            let _ = tx.send(EngineEvent::RosterLoaded { result });
        });
    }

    fn on_roster_loaded(&mut self, result: StoreResult<RosterRows>) {
        if self.roster_state != RosterLoadState::Loading {
            warn!("Roster completion without a load in flight");
            return;
        }
        if !self.config.admins.enabled {
            debug!("Admins disabled while loading, discarding roster");
            self.roster_state = RosterLoadState::Idle;
            self.reload_queued = false;
            return;
        }

        match result {
            Ok(rows) => {
                let build = Roster::from_rows(&rows);
                for issue in &build.issues {
                    warn!(error = %issue, "Skipped or degraded roster row");
                }

                let roster = Arc::new(build.roster);
                self.cache
                    .set_roster(Arc::clone(&roster), self.config.verification.roster_ttl());
                self.directory.apply_roster(Arc::clone(&roster));
                self.roster_state = RosterLoadState::Applied;
                self.counters.roster_loads_applied += 1;
                info!(admins = roster.len(), "Admin roster applied");
                self.save_backup(roster);

                if std::mem::take(&mut self.reload_queued) {
                    self.start_roster_load();
                }
            }
            Err(e) => {
                self.roster_state = RosterLoadState::Failed;
                self.counters.roster_loads_failed += 1;
                // The armed retry reloads with the latest settings.
                self.reload_queued = false;
                warn!(error = %e, kind = e.kind(), "Admin roster load failed, keeping cached roster");

                let delay = self.config.verification.retry_delay();
                self.retries
                    .arm_if_idle(Concern::RosterLoad, delay, |engine| engine.retry_roster_load());
            }
        }
    }

    fn retry_roster_load(&mut self) {
        if !self.config.admins.enabled || self.roster_state == RosterLoadState::Loading {
            return;
        }
        info!("Retrying admin roster load");
        self.start_roster_load();
    }

    /// Reload the roster if it has never been loaded or has gone stale and no
    /// load or retry is already pending. Returns `true` if a load was issued.
    ///
    /// Meant for the host's periodic tick; player verification never loads
    /// the roster on its own.
    pub fn refresh_roster_if_stale(&mut self) -> bool {
        if !self.config.admins.enabled
            || self.roster_state == RosterLoadState::Loading
            || self.retries.is_armed(Concern::RosterLoad)
        {
            return false;
        }
        let needs_load = self.cache.get_roster().is_none_or(|lookup| lookup.stale);
        if needs_load {
            debug!("Admin roster missing or stale, refreshing");
            self.start_roster_load();
        }
        needs_load
    }

    fn seed_from_backup(&mut self) {
        if !self.config.admins.enabled {
            return;
        }
        let Some(path) = self.config.admins.backup_path.clone() else {
            return;
        };
        match RosterBackup::new(&path).load() {
            Ok(Some(roster)) => {
                let roster = Arc::new(roster);
                self.cache.seed_roster(Arc::clone(&roster));
                self.directory.apply_roster(Arc::clone(&roster));
                info!(admins = roster.len(), path = %path.display(), "Admin roster restored from backup");
            }
            Ok(None) => debug!(path = %path.display(), "No admin roster backup yet"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable admin roster backup"),
        }
    }

    fn save_backup(&self, roster: Arc<Roster>) {
        let Some(path) = self.config.admins.backup_path.clone() else {
            return;
        };
        tokio::spawn(async move {
            let backup = RosterBackup::new(path);
            match backup.save(&roster).await {
                Ok(()) => debug!(path = %backup.path().display(), admins = roster.len(), "Admin roster backup written"),
                Err(e) => warn!(path = %backup.path().display(), error = %e, "Failed to write admin roster backup"),
            }
        });
    }

    // ==================== Ban checks ====================

    /// Verify a player that just connected.
    ///
    /// A fresh cached verdict is answered without any store I/O. Otherwise a
    /// ban check is issued (unless one is already in flight or queued for
    /// recheck) and the player is admitted provisionally or deferred,
    /// depending on `allow_optimistic_admission`.
    pub fn verify_player(&mut self, session: Session) -> Admission {
        let identity = session.identity.clone();
        debug!(identity = %identity, session = %session.handle, "Verifying player");

        self.sessions.insert(
            identity.clone(),
            ConnectedSession {
                session,
                deferred: false,
            },
        );

        if let Some(lookup) = self.cache.get_verdict(&identity) {
            if lookup.is_fresh() {
                return if lookup.value.banned {
                    self.enforce(&identity, lookup.value.reason.as_deref());
                    Admission::Rejected
                } else {
                    Admission::Allowed
                };
            }
        }

        self.start_ban_check(&identity);

        if self.config.verification.allow_optimistic_admission {
            Admission::Provisional
        } else {
            if let Some(connected) = self.sessions.get_mut(&identity) {
                connected.deferred = true;
            }
            Admission::Deferred
        }
    }

    /// Forget a player that left.
    ///
    /// Only acts if `handle` is the current session for `identity`, so a late
    /// disconnect for an earlier connection cannot drop a newer one.
    pub fn player_disconnected(&mut self, identity: &Identity, handle: SessionHandle) -> bool {
        match self.sessions.get(identity) {
            Some(connected) if connected.session.handle == handle => {
                self.sessions.remove(identity);
                debug!(identity = %identity, session = %handle, "Player disconnected");
                true
            }
            _ => false,
        }
    }

    fn start_ban_check(&mut self, identity: &Identity) -> bool {
        if self.pending.contains(identity) || self.in_flight.contains(identity) {
            debug!(identity = %identity, "Ban check already pending");
            return false;
        }
        let Some(connected) = self.sessions.get(identity) else {
            return false;
        };

        let query = BanQuery {
            identity: identity.clone(),
            address: connected.session.address,
            server_id: self.config.admins.server_id,
        };
        self.in_flight.insert(identity.clone());
        self.counters.ban_checks_issued += 1;

        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let limit = self.config.verification.store_timeout();
        let deadline = self.clock.sleep(limit);
        tokio::spawn(async move {
            let result = bounded(limit, deadline, store.check_ban(&query)).await;
            let _ = tx.send(EngineEvent::BanChecked {
                identity: query.identity,
                result,
            });
        });
        true
    }

    fn on_ban_checked(&mut self, identity: Identity, result: StoreResult<Vec<BanRow>>) {
        self.in_flight.remove(&identity);

        match result {
            Ok(rows) => {
                self.counters.ban_checks_succeeded += 1;
                let verdict = BanVerdict::from_rows(&rows, OffsetDateTime::now_utc());
                self.cache.set_verdict(
                    identity.clone(),
                    verdict.clone(),
                    self.config.verification.verdict_ttl(),
                );

                if !self.sessions.contains_key(&identity) {
                    self.counters.ignored_completions += 1;
                    debug!(identity = %identity, "Player left before ban check completed");
                    return;
                }

                if verdict.banned {
                    self.enforce(&identity, verdict.reason.as_deref());
                } else {
                    self.admit_if_deferred(&identity);
                }
            }
            Err(e) => {
                self.counters.ban_checks_failed += 1;
                warn!(identity = %identity, error = %e, kind = e.kind(), "Ban check failed");

                let stale_ban = self
                    .cache
                    .get_verdict(&identity)
                    .filter(|lookup| lookup.value.banned)
                    .map(|lookup| lookup.value);
                if let Some(verdict) = stale_ban {
                    if self.enforce(&identity, verdict.reason.as_deref()) {
                        self.counters.stale_disconnects += 1;
                        return;
                    }
                }

                self.pending.enqueue(identity);
                let delay = self.config.verification.retry_delay();
                self.retries
                    .arm_if_idle(Concern::BanRecheck, delay, |engine| engine.recheck_pending());
            }
        }
    }

    fn recheck_pending(&mut self) {
        let batch = self.pending.drain_snapshot();
        info!(identities = batch.len(), "Rechecking pending bans");

        for identity in batch {
            if self.sessions.contains_key(&identity) {
                self.start_ban_check(&identity);
            } else {
                debug!(identity = %identity, "Dropping recheck for departed player");
            }
        }
    }

    /// Disconnect a banned player if connected. Returns `true` if they were.
    fn enforce(&mut self, identity: &Identity, reason: Option<&str>) -> bool {
        let Some(connected) = self.sessions.remove(identity) else {
            return false;
        };
        let handle = connected.session.handle;
        let message = self
            .messages
            .render(connected.session.language.as_deref(), reason);

        info!(
            identity = %identity,
            session = %handle,
            reason = reason.unwrap_or_default(),
            "Disconnecting banned player"
        );
        self.enforcement.disconnect(handle, &message);
        self.counters.disconnects += 1;
        true
    }

    fn admit_if_deferred(&mut self, identity: &Identity) {
        let Some(connected) = self.sessions.get_mut(identity) else {
            return;
        };
        if !connected.deferred {
            return;
        }
        connected.deferred = false;
        let handle = connected.session.handle;
        debug!(identity = %identity, session = %handle, "Admitting deferred player");
        self.enforcement.admit(handle);
        self.counters.admits += 1;
    }

    // ==================== Configuration ====================

    /// Switch to a new configuration.
    ///
    /// Timing, admission policy and messages apply immediately. A change to
    /// the admin settings reloads the roster when admins are enabled.
    pub fn apply_config(&mut self, config: SbguardConfig) {
        let reload = self.config.admins.requires_reload(&config.admins);

        self.messages = BanMessages::from_config(&config.messages);
        self.cache
            .set_stale_grace(config.verification.verdict_stale_grace());
        if !config.admins.enabled {
            self.retries.cancel(Concern::RosterLoad);
            self.reload_queued = false;
        }
        self.config = config;
        debug!("Engine configuration updated");

        if reload {
            info!("Admin settings changed, reloading roster");
            self.request_roster_reload();
        }
    }

    // ==================== Sequencer ====================

    /// Apply one completion.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RosterLoaded { result } => self.on_roster_loaded(result),
            EngineEvent::BanChecked { identity, result } => self.on_ban_checked(identity, result),
            EngineEvent::RetryFired(fired) => {
                if let Some(callback) = self.retries.fire(fired) {
                    callback(self);
                }
            }
        }
    }

    /// Apply every completion that has already arrived, without waiting.
    /// Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next completion. The caller passes it to
    /// [`handle_event`](Self::handle_event).
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events_rx.recv().await
    }

    // ==================== Inspection ====================

    #[must_use]
    pub fn roster_state(&self) -> RosterLoadState {
        self.roster_state
    }

    #[must_use]
    pub fn roster_view(&self) -> RosterView {
        self.cache.roster_view()
    }

    #[must_use]
    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    #[must_use]
    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.sessions.contains_key(identity)
    }

    #[must_use]
    pub fn is_pending_recheck(&self, identity: &Identity) -> bool {
        self.pending.contains(identity)
    }

    #[must_use]
    pub fn is_check_in_flight(&self, identity: &Identity) -> bool {
        self.in_flight.contains(identity)
    }

    #[must_use]
    pub fn is_retry_armed(&self, concern: Concern) -> bool {
        self.retries.is_armed(concern)
    }

    #[must_use]
    pub fn armed_retries(&self) -> usize {
        self.retries.armed_count()
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            counters: self.counters.clone(),
            cache: self.cache.stats(),
            retries: self.retries.stats(),
            roster_state: self.roster_state,
            sessions: self.sessions.len(),
            pending_rechecks: self.pending.len(),
            checks_in_flight: self.in_flight.len(),
        }
    }

    // ==================== Task ====================

    /// Run the engine on its own task.
    ///
    /// Returns a cloneable [`EngineHandle`] and the task's join handle.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = EngineHandle {
            commands: tx,
            roster: self.roster_view(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// Serve commands and completions until shutdown or until every
    /// [`EngineHandle`] is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        enum Next {
            Command(Option<EngineCommand>),
            Event(EngineEvent),
        }

        info!("Verification engine started");
        loop {
            let next = tokio::select! {
                command = commands.recv() => Next::Command(command),
                Some(event) = self.events_rx.recv() => Next::Event(event),
            };

            match next {
                Next::Command(None | Some(EngineCommand::Shutdown)) => break,
                Next::Command(Some(command)) => self.handle_command(command),
                Next::Event(event) => self.handle_event(event),
            }
        }

        self.retries.cancel_all();
        info!("Verification engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Verify { session, reply } => {
                let _ = reply.send(self.verify_player(session));
            }
            EngineCommand::Disconnected { identity, handle } => {
                self.player_disconnected(&identity, handle);
            }
            EngineCommand::ReloadRoster => {
                self.request_roster_reload();
            }
            EngineCommand::RefreshRoster => {
                self.refresh_roster_if_stale();
            }
            EngineCommand::ApplyConfig(config) => self.apply_config(*config),
            EngineCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            EngineCommand::Shutdown => {}
        }
    }
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("roster_state", &self.roster_state)
            .field("sessions", &self.sessions.len())
            .field("pending", &self.pending.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

/// Run a store call until it finishes or `deadline` fires, whichever is first.
async fn bounded<T>(
    limit: Duration,
    deadline: BoxFuture<'static, ()>,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::select! {
        biased;
        result = call => result,
        () = deadline => Err(StoreError::timeout(limit)),
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Requests to an engine running on its own task.
#[derive(Debug)]
pub enum EngineCommand {
    Verify {
        session: Session,
        reply: oneshot::Sender<Admission>,
    },
    Disconnected {
        identity: Identity,
        handle: SessionHandle,
    },
    ReloadRoster,
    RefreshRoster,
    ApplyConfig(Box<SbguardConfig>),
    Stats(oneshot::Sender<EngineStats>),
    Shutdown,
}

/// The engine task is gone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("verification engine has shut down")]
pub struct EngineClosed;

/// Cloneable handle to a spawned engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    roster: RosterView,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.commands.send(command).await.map_err(|_| EngineClosed)
    }

    /// Verify a connecting player.
    pub async fn verify(&self, session: Session) -> Result<Admission, EngineClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Verify { session, reply }).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    pub async fn disconnected(
        &self,
        identity: Identity,
        handle: SessionHandle,
    ) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Disconnected { identity, handle })
            .await
    }

    pub async fn reload_roster(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::ReloadRoster).await
    }

    /// Reload the roster only if it is missing or past its TTL.
    pub async fn refresh_roster(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::RefreshRoster).await
    }

    pub async fn apply_config(&self, config: SbguardConfig) -> Result<(), EngineClosed> {
        self.send(EngineCommand::ApplyConfig(Box::new(config)))
            .await
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Stats(reply)).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Stop the engine task. Armed retries are cancelled.
    pub async fn shutdown(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Shutdown).await
    }

    /// Read access to the current roster snapshot from any thread.
    #[must_use]
    pub fn roster(&self) -> &RosterView {
        &self.roster
    }
}
