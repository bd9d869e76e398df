//! The backing store the engine verifies against.
//!
//! Implementations run off the engine's sequencer; the engine spawns each call
//! as its own task and bounds it with the configured store timeout.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use sbguard_core::{BanRow, Identity, RosterRows};

/// Errors a store call can fail with.
///
/// Every variant is treated as the store being unavailable: the engine logs
/// it and retries, nothing is surfaced to players.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity problem.
        message: String,
    },

    /// The call did not complete within the store timeout.
    #[error("Store call timed out after {}s", .elapsed.as_secs())]
    Timeout {
        /// How long the engine waited.
        elapsed: Duration,
    },

    /// The store answered with an error of its own.
    #[error("Store error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short label for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters for an admin roster load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterQuery {
    /// This server's ID in the web panel.
    pub server_id: u32,
    /// Only include admins that have logged into the web panel.
    pub require_site_login: bool,
}

/// Parameters for a ban lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanQuery {
    pub identity: Identity,
    pub address: Option<IpAddr>,
    pub server_id: u32,
}

/// Read access to admins and bans.
///
/// Queries carry structured parameters only; building the actual query text
/// is up to the implementation.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the admin roster rows for a server.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be queried.
    async fn load_roster(&self, query: &RosterQuery) -> StoreResult<RosterRows>;

    /// Fetch the ban rows matching an identity or address.
    ///
    /// Rows may include expired or lifted bans; the engine decides which are
    /// in force.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot be queried.
    async fn check_ban(&self, query: &BanQuery) -> StoreResult<Vec<BanRow>>;
}
