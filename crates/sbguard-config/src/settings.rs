use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Lower bound for the retry delay.
pub const MIN_RETRY_DELAY_SECS: u64 = 15;
/// Upper bound for the retry delay.
pub const MAX_RETRY_DELAY_SECS: u64 = 60;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 45;

/// Clamp a retry delay into `[MIN_RETRY_DELAY_SECS, MAX_RETRY_DELAY_SECS]`.
#[must_use]
pub fn clamp_retry_delay(delay: Duration) -> Duration {
    delay.clamp(
        Duration::from_secs(MIN_RETRY_DELAY_SECS),
        Duration::from_secs(MAX_RETRY_DELAY_SECS),
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SbguardConfig {
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub admins: AdminsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SbguardConfig {
    pub fn validate(&self) -> Result<()> {
        let v = &self.verification;
        if v.roster_ttl_seconds == 0 {
            return Err(ConfigError::validation(
                "verification.roster_ttl_seconds must be > 0",
            ));
        }
        if v.verdict_ttl_seconds == 0 {
            return Err(ConfigError::validation(
                "verification.verdict_ttl_seconds must be > 0",
            ));
        }
        if v.store_timeout_seconds == 0 {
            return Err(ConfigError::validation(
                "verification.store_timeout_seconds must be > 0",
            ));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        for (lang, template) in &self.messages.templates {
            if lang.trim().is_empty() {
                return Err(ConfigError::validation(
                    "messages.templates keys must be non-empty language tags",
                ));
            }
            if template.trim().is_empty() {
                return Err(ConfigError::validation(format!(
                    "messages.templates.{lang} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Timing and admission policy for the verification engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Seconds to wait before retrying a failed store call. Clamped to 15..=60.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_ttl_seconds")]
    pub roster_ttl_seconds: u64,
    #[serde(default = "default_ttl_seconds")]
    pub verdict_ttl_seconds: u64,
    /// How long a stale verdict is kept for fallback before it is evicted.
    #[serde(default = "default_stale_grace_seconds")]
    pub verdict_stale_grace_seconds: u64,
    /// Upper bound on a single store call before it counts as unavailable.
    #[serde(default = "default_store_timeout_seconds")]
    pub store_timeout_seconds: u64,
    /// Let players in while their first ban check is outstanding.
    #[serde(default = "default_true")]
    pub allow_optimistic_admission: bool,
}

fn default_retry_delay_seconds() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_ttl_seconds() -> u64 {
    300
}
fn default_stale_grace_seconds() -> u64 {
    3600
}
fn default_store_timeout_seconds() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            retry_delay_seconds: default_retry_delay_seconds(),
            roster_ttl_seconds: default_ttl_seconds(),
            verdict_ttl_seconds: default_ttl_seconds(),
            verdict_stale_grace_seconds: default_stale_grace_seconds(),
            store_timeout_seconds: default_store_timeout_seconds(),
            allow_optimistic_admission: true,
        }
    }
}

impl VerificationConfig {
    /// Retry delay after clamping.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        clamp_retry_delay(Duration::from_secs(self.retry_delay_seconds))
    }

    /// Whether the configured retry delay falls outside the allowed range.
    #[must_use]
    pub fn retry_delay_clamped(&self) -> bool {
        !(MIN_RETRY_DELAY_SECS..=MAX_RETRY_DELAY_SECS).contains(&self.retry_delay_seconds)
    }

    #[must_use]
    pub fn roster_ttl(&self) -> Duration {
        Duration::from_secs(self.roster_ttl_seconds)
    }

    #[must_use]
    pub fn verdict_ttl(&self) -> Duration {
        Duration::from_secs(self.verdict_ttl_seconds)
    }

    #[must_use]
    pub fn verdict_stale_grace(&self) -> Duration {
        Duration::from_secs(self.verdict_stale_grace_seconds)
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

/// Admin roster settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Only include admins who have logged into the web panel at least once.
    #[serde(default)]
    pub require_site_login: bool,
    /// ID of this server in the web panel.
    #[serde(default)]
    pub server_id: u32,
    /// File the last applied roster is written to, and read back on startup
    /// so admins survive a restart while the store is down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

impl Default for AdminsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_site_login: false,
            server_id: 0,
            backup_path: None,
        }
    }
}

impl AdminsConfig {
    /// Whether switching from `self` to `next` requires a roster reload.
    ///
    /// Only settings that change which admins the store returns count.
    #[must_use]
    pub fn requires_reload(&self, next: &AdminsConfig) -> bool {
        next.enabled
            && (self.enabled != next.enabled
                || self.require_site_login != next.require_site_login
                || self.server_id != next.server_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MessagesConfig {
    /// Website shown to banned players for appeals.
    #[serde(default)]
    pub website: String,
    /// Kick message templates keyed by language tag. Supports `{website}`
    /// and `{reason}` placeholders.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
