//! Interactive host: drive a spawned engine from stdin.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use sbguard_config::{ConfigWatcher, SbguardConfig};
use sbguard_core::{Identity, Session, SessionHandle};
use sbguard_db_memory::MemoryStore;
use sbguard_verify::{Admission, EngineHandle, TokioClock, VerificationEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::cli::RunArgs;
use crate::host::ConsoleHost;
use crate::observability;
use crate::output::{print_error, print_success, settings_table, table};

/// How often the host asks the engine to refresh a stale roster.
const ROSTER_TICK: Duration = Duration::from_secs(15);

const HELP: &str = "\
commands:
  connect <handle> <identity> [ip] [language]   player joins
  disconnect <handle>                           player leaves
  reload                                        reload the admin roster
  outage on|off                                 take the store down or bring it back
  latency <ms>                                  delay every store call
  admins                                        show the current roster
  stats                                         show engine counters
  help                                          show this text
  quit                                          stop";

#[derive(Debug, PartialEq, Eq)]
enum HostCommand {
    Connect {
        handle: SessionHandle,
        identity: Identity,
        address: Option<IpAddr>,
        language: Option<String>,
    },
    Disconnect(SessionHandle),
    Reload,
    Outage(bool),
    Latency(Duration),
    Admins,
    Stats,
    Help,
    Quit,
}

fn parse_handle(value: Option<&str>) -> Result<SessionHandle, String> {
    let value = value.ok_or("missing session handle")?;
    value
        .trim_start_matches('#')
        .parse()
        .map(SessionHandle)
        .map_err(|_| format!("invalid session handle: {value}"))
}

fn parse_line(line: &str) -> Result<Option<HostCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };

    let parsed = match command {
        "connect" => {
            let handle = parse_handle(words.next())?;
            let identity = words
                .next()
                .ok_or("missing identity")?
                .parse::<Identity>()
                .map_err(|e| e.to_string())?;
            let address = words
                .next()
                .map(|ip| ip.parse().map_err(|_| format!("invalid address: {ip}")))
                .transpose()?;
            HostCommand::Connect {
                handle,
                identity,
                address,
                language: words.next().map(str::to_string),
            }
        }
        "disconnect" => HostCommand::Disconnect(parse_handle(words.next())?),
        "reload" => HostCommand::Reload,
        "outage" => match words.next() {
            Some("on") => HostCommand::Outage(true),
            Some("off") => HostCommand::Outage(false),
            _ => return Err("usage: outage on|off".to_string()),
        },
        "latency" => {
            let millis = words
                .next()
                .and_then(|ms| ms.parse().ok())
                .ok_or("usage: latency <ms>")?;
            HostCommand::Latency(Duration::from_millis(millis))
        }
        "admins" => HostCommand::Admins,
        "stats" => HostCommand::Stats,
        "help" => HostCommand::Help,
        "quit" | "exit" => HostCommand::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(parsed))
}

struct Host {
    engine: EngineHandle,
    store: Arc<MemoryStore>,
    sessions: HashMap<SessionHandle, Identity>,
}

impl Host {
    /// Returns `false` when the host should stop.
    async fn execute(&mut self, command: HostCommand) -> Result<bool> {
        match command {
            HostCommand::Connect {
                handle,
                identity,
                address,
                language,
            } => {
                let mut session = Session::new(handle, identity.clone());
                if let Some(address) = address {
                    session = session.with_address(address);
                }
                if let Some(language) = language {
                    session = session.with_language(language);
                }
                self.sessions.insert(handle, identity.clone());

                let admission = self.engine.verify(session).await?;
                let label = match admission {
                    Admission::Allowed => "allowed".green(),
                    Admission::Rejected => "rejected".red(),
                    Admission::Provisional => "provisional".yellow(),
                    Admission::Deferred => "deferred".yellow(),
                };
                println!("{handle} {identity}: {label}");
                if let Some(admin) = self.engine.roster().admin(&identity) {
                    println!(
                        "  admin flags {} immunity {}",
                        admin.flags.to_string().cyan(),
                        admin.immunity
                    );
                }
            }
            HostCommand::Disconnect(handle) => match self.sessions.remove(&handle) {
                Some(identity) => self.engine.disconnected(identity, handle).await?,
                None => print_error(&format!("no session {handle}")),
            },
            HostCommand::Reload => self.engine.reload_roster().await?,
            HostCommand::Outage(down) => {
                self.store.set_available(!down);
                print_success(if down { "store is down" } else { "store is up" });
            }
            HostCommand::Latency(latency) => {
                self.store.set_latency(latency);
                print_success(&format!("store latency {}ms", latency.as_millis()));
            }
            HostCommand::Admins => self.print_admins(),
            HostCommand::Stats => {
                let stats = self.engine.stats().await?;
                let c = &stats.counters;
                println!(
                    "{}",
                    settings_table(&[
                        ("roster state", format!("{:?}", stats.roster_state)),
                        ("sessions", stats.sessions.to_string()),
                        ("pending rechecks", stats.pending_rechecks.to_string()),
                        ("checks in flight", stats.checks_in_flight.to_string()),
                        ("roster loads", format!(
                            "{} issued, {} applied, {} failed",
                            c.roster_loads_issued, c.roster_loads_applied, c.roster_loads_failed
                        )),
                        ("ban checks", format!(
                            "{} issued, {} ok, {} failed",
                            c.ban_checks_issued, c.ban_checks_succeeded, c.ban_checks_failed
                        )),
                        ("disconnects", format!("{} ({} stale)", c.disconnects, c.stale_disconnects)),
                        ("admits", c.admits.to_string()),
                        ("verdict cache", format!(
                            "{} entries, {} hits, {} stale, {} misses",
                            stats.cache.verdict_entries,
                            stats.cache.verdict_hits,
                            stats.cache.verdict_stale_hits,
                            stats.cache.verdict_misses
                        )),
                        ("retries", format!(
                            "{} armed, {} fired, {} coalesced",
                            stats.retries.armed, stats.retries.fired, stats.retries.coalesced
                        )),
                    ])
                );
            }
            HostCommand::Help => println!("{HELP}"),
            HostCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn print_admins(&self) {
        let Some(roster) = self.engine.roster().snapshot() else {
            println!("No roster loaded yet.");
            return;
        };
        let mut admins: Vec<_> = roster.iter().collect();
        admins.sort_by(|a, b| a.identity.cmp(&b.identity));
        let rows = admins.into_iter().map(|admin| {
            [
                admin.identity.to_string(),
                admin.identity.to_steam2(),
                admin.flags.to_string(),
                admin.immunity.to_string(),
            ]
        });
        println!("{}", table(&["SteamID64", "Steam2", "Flags", "Immunity"], rows));
    }
}

pub async fn run(
    config_path: &Path,
    config: SbguardConfig,
    args: &RunArgs,
    level_override: bool,
) -> Result<()> {
    let store = match &args.fixture {
        Some(path) => MemoryStore::from_path(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?,
        None => MemoryStore::new(),
    };
    let store = Arc::new(store);
    let console = Arc::new(ConsoleHost);

    let engine = VerificationEngine::new(
        config,
        store.clone(),
        console.clone(),
        console,
        Arc::new(TokioClock),
    );
    let (handle, task) = engine.spawn();
    handle.reload_roster().await?;

    let (config_tx, mut config_rx) = mpsc::channel(4);
    let watcher = if args.no_watch || !config_path.exists() {
        None
    } else {
        Some(ConfigWatcher::new(config_path).watch(config_tx)?)
    };

    let mut host = Host {
        engine: handle.clone(),
        store,
        sessions: HashMap::new(),
    };
    println!("{HELP}");

    let mut roster_tick = tokio::time::interval_at(
        tokio::time::Instant::now() + ROSTER_TICK,
        ROSTER_TICK,
    );
    roster_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = roster_tick.tick() => handle.refresh_roster().await?,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    Ok(Some(command)) => {
                        if !host.execute(command).await? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => print_error(&e),
                }
            }
            Some(config) = config_rx.recv() => {
                if !level_override {
                    observability::set_level(&config.logging.level);
                }
                handle.apply_config(config).await?;
                print_success("configuration reloaded");
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    handle.shutdown().await?;
    task.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let command = parse_line("connect #4 STEAM_0:1:1 192.0.2.1 pt-BR")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            HostCommand::Connect {
                handle: SessionHandle(4),
                identity: "76561197960265731".parse().unwrap(),
                address: Some("192.0.2.1".parse().unwrap()),
                language: Some("pt-BR".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("connect 1 nobody").is_err());
        assert!(parse_line("connect x 76561197960265731").is_err());
        assert!(parse_line("outage maybe").is_err());
        assert!(parse_line("latency fast").is_err());
        assert!(parse_line("kick 1").is_err());
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("outage on").unwrap(), Some(HostCommand::Outage(true)));
        assert_eq!(
            parse_line("latency 250").unwrap(),
            Some(HostCommand::Latency(Duration::from_millis(250)))
        );
        assert_eq!(parse_line("disconnect 3").unwrap(), Some(HostCommand::Disconnect(SessionHandle(3))));
        assert_eq!(parse_line("exit").unwrap(), Some(HostCommand::Quit));
    }
}
