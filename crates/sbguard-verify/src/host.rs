//! Side effects the engine applies to the host.
//!
//! Both traits are called from the engine's sequencer and must not block.

use std::sync::Arc;

use sbguard_core::{Roster, SessionHandle};

/// The host's active privilege table.
pub trait AdminDirectory: Send + Sync {
    /// Replace every admin privilege with `roster`.
    fn apply_roster(&self, roster: Arc<Roster>);
}

/// Kicks and admissions.
pub trait Enforcement: Send + Sync {
    /// Terminate a session with a message shown to the player.
    fn disconnect(&self, session: SessionHandle, reason: &str);

    /// Let a deferred session in once it has been verified as not banned.
    fn admit(&self, _session: SessionHandle) {}
}
