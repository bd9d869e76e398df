//! Core error types.
//!
//! Store connectivity failures live with the `Store` trait in `sbguard-verify`;
//! the errors here are the ones raised while interpreting identities and
//! roster rows.

/// Errors raised by core types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A player identifier could not be parsed.
    ///
    /// These are rejected at the boundary; the verification engine only ever
    /// sees well-formed identities.
    #[error("Malformed identity '{input}': {reason}")]
    MalformedIdentity {
        /// The raw input that failed to parse.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A roster row references a group that the store did not return.
    ///
    /// Tolerated: the row's own flags and immunity are used.
    #[error("Roster row for {identity} references unknown group '{group}'")]
    RosterInconsistent {
        /// Identity of the admin row.
        identity: String,
        /// The group name that could not be resolved.
        group: String,
    },
}

impl CoreError {
    /// Creates a new `MalformedIdentity` error.
    #[must_use]
    pub fn malformed_identity(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentity {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `RosterInconsistent` error.
    #[must_use]
    pub fn roster_inconsistent(identity: impl Into<String>, group: impl Into<String>) -> Self {
        Self::RosterInconsistent {
            identity: identity.into(),
            group: group.into(),
        }
    }

    /// Returns `true` if processing can continue after this error.
    #[must_use]
    pub fn is_tolerated(&self) -> bool {
        matches!(self, Self::RosterInconsistent { .. })
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
