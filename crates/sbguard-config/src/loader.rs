use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, warn};

use crate::settings::SbguardConfig;
use crate::{ConfigError, Result};

/// Prefix for environment overrides, e.g. `SBGUARD__ADMINS__SERVER_ID=3`.
pub const ENV_PREFIX: &str = "SBGUARD";

const DEFAULT_CONFIG_FILE: &str = "sbguard.toml";

/// Load configuration from a TOML file plus environment overrides.
///
/// With `path == None` the default `sbguard.toml` in the working directory is
/// used when present. A missing file is not an error; defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<SbguardConfig> {
    let mut builder = Config::builder();
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if file.exists() {
        builder = builder.add_source(File::from(file.clone()).format(FileFormat::Toml));
    } else if path.is_some() {
        warn!("config file {:?} does not exist; using defaults", file);
    } else {
        debug!("no {DEFAULT_CONFIG_FILE} found; using defaults");
    }
    finish(builder)
}

/// Load configuration from TOML text plus environment overrides.
pub fn load_config_str(toml: &str) -> Result<SbguardConfig> {
    let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
    finish(builder)
}

fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<SbguardConfig> {
    let cfg = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        )
        .build()
        .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
    let merged: SbguardConfig = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
    merged.validate()?;

    if merged.verification.retry_delay_clamped() {
        warn!(
            configured = merged.verification.retry_delay_seconds,
            effective = merged.verification.retry_delay().as_secs(),
            "verification.retry_delay_seconds out of range; clamped"
        );
    }
    Ok(merged)
}
