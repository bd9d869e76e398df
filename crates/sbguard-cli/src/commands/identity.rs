use anyhow::{Result, bail};
use colored::Colorize;
use sbguard_core::Identity;
use serde_json::json;

use crate::cli::OutputFormat;
use crate::output::table;

pub fn normalize(inputs: &[String], format: OutputFormat) -> Result<()> {
    let results: Vec<_> = inputs
        .iter()
        .map(|input| (input.as_str(), Identity::parse(input)))
        .collect();
    let failures = results.iter().filter(|(_, r)| r.is_err()).count();

    match format {
        OutputFormat::Json => {
            let items: Vec<_> = results
                .iter()
                .map(|(input, result)| match result {
                    Ok(identity) => json!({
                        "input": input,
                        "steamid64": identity.as_str(),
                        "steam2": identity.to_steam2(),
                        "account_id": identity.account_id(),
                    }),
                    Err(e) => json!({ "input": input, "error": e.to_string() }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => {
            let rows = results.iter().map(|(input, result)| match result {
                Ok(identity) => [
                    input.to_string(),
                    identity.to_string(),
                    identity.to_steam2(),
                    identity.account_id().to_string(),
                ],
                Err(e) => [
                    input.to_string(),
                    e.to_string().red().to_string(),
                    "-".to_string(),
                    "-".to_string(),
                ],
            });
            println!(
                "{}",
                table(&["Input", "SteamID64", "Steam2", "Account"], rows)
            );
        }
    }

    if failures > 0 {
        bail!("{failures} of {} identities are malformed", inputs.len());
    }
    Ok(())
}
