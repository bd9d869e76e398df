//! # sbguard-verify
//!
//! Asynchronous ban and admin verification for a latency-sensitive host.
//!
//! The host never waits on the backing store. Lookups are issued as spawned
//! tasks, their completions are applied on the engine's sequencer, results
//! are cached with a TTL, and failed lookups are retried on a fixed interval
//! while the last known-good state keeps serving.
//!
//! - [`clock`] - time source, with a hand-driven clock for tests
//! - [`cache`] - roster snapshot and per-identity verdict cache
//! - [`backup`] - on-disk copy of the last applied roster
//! - [`retry`] - one retry timer per concern
//! - [`queue`] - identities awaiting a ban recheck
//! - [`store`] - the backing store trait and its errors
//! - [`host`] - side effects applied to the host
//! - [`messages`] - localized kick messages
//! - [`engine`] - the verification engine and its task handle

pub mod backup;
pub mod cache;
pub mod clock;
pub mod engine;
pub mod host;
pub mod messages;
pub mod queue;
pub mod retry;
pub mod store;

pub use backup::{BackupError, RosterBackup};
pub use cache::{CacheEntry, CacheStats, Lookup, RosterView, VerificationCache};
pub use clock::{Clock, ManualClock, TokioClock};
pub use engine::{
    Admission, EngineClosed, EngineCommand, EngineCounters, EngineEvent, EngineHandle,
    EngineStats, RosterLoadState, VerificationEngine,
};
pub use host::{AdminDirectory, Enforcement};
pub use messages::BanMessages;
pub use queue::PendingRecheckQueue;
pub use retry::{Concern, RetryScheduler, RetryStats, RetryTimer, TimerFired, TimerId};
pub use store::{BanQuery, RosterQuery, Store, StoreError, StoreResult};
