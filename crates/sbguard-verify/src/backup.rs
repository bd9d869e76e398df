//! On-disk copy of the last applied admin roster.
//!
//! After every successful load the roster is written as JSON. On startup the
//! engine reads it back so a restart during a store outage still has admins.

use std::io;
use std::path::{Path, PathBuf};

use sbguard_core::{AdminRecord, Roster};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("roster backup I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("roster backup is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
    admins: Vec<AdminRecord>,
}

/// Reads and writes the roster backup file.
#[derive(Debug, Clone)]
pub struct RosterBackup {
    path: PathBuf,
}

impl RosterBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved roster. `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Roster>, BackupError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(snapshot.admins.into_iter().collect()))
    }

    /// Write `roster`, replacing the previous backup in one rename.
    pub async fn save(&self, roster: &Roster) -> Result<(), BackupError> {
        let mut admins: Vec<AdminRecord> = roster.iter().cloned().collect();
        admins.sort_by(|a, b| a.identity.cmp(&b.identity));
        let snapshot = Snapshot {
            saved_at: OffsetDateTime::now_utc(),
            admins,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
