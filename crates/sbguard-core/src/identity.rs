//! Player identities.
//!
//! Every identity handled by the engine is a SteamID64 for an individual
//! account. The legacy `STEAM_X:Y:Z` and `[U:1:N]` renderings are accepted at
//! parse time and normalized, so two spellings of the same account always hash
//! to the same cache key.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// SteamID64 of account number zero in the public individual universe.
pub const STEAMID64_BASE: u64 = 76_561_197_960_265_728;

static STEAM2_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^STEAM_[0-5]:([01]):([0-9]{1,10})$").expect("Invalid STEAM_X regex")
});

static STEAM3_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\[U:1:([0-9]{1,10})\]$").expect("Invalid [U:1:N] regex")
});

/// A validated, normalized player identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and normalize an identity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MalformedIdentity`] if the input is not a
    /// recognizable individual-account Steam identifier.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CoreError::malformed_identity(input, "empty identifier"));
        }

        if let Some(caps) = STEAM2_REGEX.captures(trimmed) {
            let y: u64 = caps[1]
                .parse()
                .map_err(|_| CoreError::malformed_identity(input, "invalid auth server bit"))?;
            let z: u64 = caps[2]
                .parse()
                .map_err(|_| CoreError::malformed_identity(input, "invalid account number"))?;
            return Self::from_account_id(input, z * 2 + y);
        }

        if let Some(caps) = STEAM3_REGEX.captures(trimmed) {
            let account: u64 = caps[1]
                .parse()
                .map_err(|_| CoreError::malformed_identity(input, "invalid account number"))?;
            return Self::from_account_id(input, account);
        }

        if trimmed.len() == 17 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let value: u64 = trimmed
                .parse()
                .map_err(|_| CoreError::malformed_identity(input, "not a 64-bit number"))?;
            let account = value.checked_sub(STEAMID64_BASE).ok_or_else(|| {
                CoreError::malformed_identity(input, "below the individual account range")
            })?;
            return Self::from_account_id(input, account);
        }

        Err(CoreError::malformed_identity(
            input,
            "expected SteamID64, STEAM_X:Y:Z or [U:1:N]",
        ))
    }

    fn from_account_id(input: &str, account: u64) -> Result<Self> {
        if account == 0 || account > u64::from(u32::MAX) {
            return Err(CoreError::malformed_identity(
                input,
                "account number out of range",
            ));
        }
        Ok(Self((STEAMID64_BASE + account).to_string()))
    }

    /// The normalized SteamID64 string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 32-bit account number.
    #[must_use]
    pub fn account_id(&self) -> u32 {
        // Construction guarantees the value is in range.
        self.0
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_sub(STEAMID64_BASE))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or_default()
    }

    /// Render in the legacy `STEAM_0:Y:Z` form.
    #[must_use]
    pub fn to_steam2(&self) -> String {
        let account = self.account_id();
        format!("STEAM_0:{}:{}", account % 2, account / 2)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
