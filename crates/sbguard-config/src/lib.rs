//! Configuration for the sbguard verification engine.
//!
//! This crate provides:
//! - Typed settings with defaults matching the stock plugin convars
//! - Loading from TOML plus `SBGUARD__`-prefixed environment overrides
//! - Validation and retry-delay clamping
//! - A debounced file watcher that re-emits validated configurations

pub mod loader;
pub mod settings;
pub mod watch;

pub use loader::{ENV_PREFIX, load_config, load_config_str};
pub use settings::{
    AdminsConfig, DEFAULT_RETRY_DELAY_SECS, LoggingConfig, MAX_RETRY_DELAY_SECS,
    MIN_RETRY_DELAY_SECS, MessagesConfig, SbguardConfig, VerificationConfig, clamp_retry_delay,
};
pub use watch::{ConfigWatcher, WatchHandle};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
