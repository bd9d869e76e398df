//! # sbguard-core
//!
//! Shared types for the sbguard verification engine:
//!
//! - [`identity`] - validated, normalized player identities
//! - [`session`] - connected player sessions
//! - [`admin`] - admin flags, roster snapshots and roster building
//! - [`ban`] - ban rows and cached ban verdicts
//! - [`error`] - core error taxonomy

pub mod admin;
pub mod ban;
pub mod error;
pub mod identity;
pub mod session;

pub use admin::{AdminFlags, AdminRecord, AdminRow, GroupRow, Roster, RosterBuild, RosterRows};
pub use ban::{BanRow, BanVerdict};
pub use error::{CoreError, Result};
pub use identity::{Identity, STEAMID64_BASE};
pub use session::{Session, SessionHandle};
