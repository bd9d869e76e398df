use std::path::Path;

use anyhow::{Context, Result};
use sbguard_config::{SbguardConfig, load_config};

use crate::cli::OutputFormat;
use crate::output::{print_success, print_warning, settings_table};

pub fn check_config(path: &Path, format: OutputFormat) -> Result<()> {
    if !path.exists() {
        print_warning(&format!(
            "{} not found, showing defaults and environment overrides",
            path.display()
        ));
    }
    let config = load_config(Some(path))
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Table => {
            println!("{}", settings_table(&summary(&config)));
            if config.verification.retry_delay_clamped() {
                print_warning(&format!(
                    "retry_delay_seconds = {} is outside 15..=60, using {}s",
                    config.verification.retry_delay_seconds,
                    config.verification.retry_delay().as_secs()
                ));
            }
            print_success("Configuration is valid");
        }
    }
    Ok(())
}

fn summary(config: &SbguardConfig) -> Vec<(&'static str, String)> {
    let v = &config.verification;
    let a = &config.admins;
    let mut pairs = vec![
        ("retry delay", format!("{}s", v.retry_delay().as_secs())),
        ("roster ttl", format!("{}s", v.roster_ttl_seconds)),
        ("verdict ttl", format!("{}s", v.verdict_ttl_seconds)),
        ("verdict stale grace", format!("{}s", v.verdict_stale_grace_seconds)),
        ("store timeout", format!("{}s", v.store_timeout_seconds)),
        ("optimistic admission", v.allow_optimistic_admission.to_string()),
        ("admins enabled", a.enabled.to_string()),
        ("require site login", a.require_site_login.to_string()),
        ("server id", a.server_id.to_string()),
        (
            "roster backup",
            a.backup_path
                .as_ref()
                .map_or_else(|| "(disabled)".to_string(), |p| p.display().to_string()),
        ),
        (
            "website",
            if config.messages.website.is_empty() {
                "(not set)".to_string()
            } else {
                config.messages.website.clone()
            },
        ),
        ("log level", config.logging.level.clone()),
    ];
    if !config.messages.templates.is_empty() {
        let languages: Vec<&str> = config.messages.templates.keys().map(String::as_str).collect();
        pairs.push(("message languages", languages.join(", ")));
    }
    pairs
}
