//! Console stand-ins for the game server's admin table and kick API.

use std::sync::Arc;

use colored::Colorize;
use sbguard_core::{Roster, SessionHandle};
use sbguard_verify::{AdminDirectory, Enforcement};

/// Prints every side effect the engine applies.
#[derive(Debug, Default)]
pub struct ConsoleHost;

impl AdminDirectory for ConsoleHost {
    fn apply_roster(&self, roster: Arc<Roster>) {
        println!(
            "{} admin roster applied ({} admins)",
            "●".cyan(),
            roster.len()
        );
    }
}

impl Enforcement for ConsoleHost {
    fn disconnect(&self, session: SessionHandle, reason: &str) {
        println!("{} kicked {}: {}", "✗".red(), session, reason.yellow());
    }

    fn admit(&self, session: SessionHandle) {
        println!("{} admitted {}", "✓".green(), session);
    }
}
