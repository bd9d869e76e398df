//! Ban rows and verdicts.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::identity::Identity;

/// A ban record as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRow {
    pub ban_id: u64,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Ban length in minutes. `0` is permanent.
    #[serde(default)]
    pub length_minutes: u32,
    /// Set when an admin lifted the ban.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub removed_at: Option<OffsetDateTime>,
}

impl BanRow {
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.length_minutes == 0
    }

    /// When the ban runs out, `None` for permanent bans.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        if self.is_permanent() {
            None
        } else {
            Some(self.created_at + Duration::minutes(i64::from(self.length_minutes)))
        }
    }

    /// Whether the ban is in force at `now`.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        if self.removed_at.is_some() {
            return false;
        }
        self.expires_at().is_none_or(|ends| ends > now)
    }

    /// Whether this row applies to the given identity or address.
    #[must_use]
    pub fn matches(&self, identity: &Identity, address: Option<IpAddr>) -> bool {
        self.identity.as_ref() == Some(identity)
            || (address.is_some() && self.address == address)
    }
}

/// Cached ban determination for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanVerdict {
    pub banned: bool,
    /// Reason recorded on the ban, if any.
    #[serde(default)]
    pub reason: Option<String>,
}

impl BanVerdict {
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn banned(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            banned: true,
            reason: (!reason.is_empty()).then_some(reason),
        }
    }

    /// Derive a verdict from the rows a ban lookup returned.
    ///
    /// Banned if any row is in force at `now`; the reason comes from the most
    /// recently created active row.
    #[must_use]
    pub fn from_rows(rows: &[BanRow], now: OffsetDateTime) -> Self {
        rows.iter()
            .filter(|row| row.is_active(now))
            .max_by_key(|row| row.created_at)
            .map_or_else(Self::clean, |row| Self::banned(row.reason.clone()))
    }
}
