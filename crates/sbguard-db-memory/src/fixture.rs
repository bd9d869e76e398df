//! Seed data for the in-memory store.

use std::path::Path;

use sbguard_core::{AdminRow, BanRow, GroupRow};
use serde::{Deserialize, Serialize};

use crate::Result;

/// An admin as stored by the web panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAdmin {
    #[serde(flatten)]
    pub row: AdminRow,
    /// Servers this admin is assigned to. Empty means every server.
    #[serde(default)]
    pub servers: Vec<u32>,
    /// Whether the admin has logged into the web panel at least once.
    #[serde(default = "default_true")]
    pub site_login: bool,
}

fn default_true() -> bool {
    true
}

impl StoredAdmin {
    pub fn new(row: AdminRow) -> Self {
        Self {
            row,
            servers: Vec::new(),
            site_login: true,
        }
    }

    pub fn with_servers(mut self, servers: impl IntoIterator<Item = u32>) -> Self {
        self.servers = servers.into_iter().collect();
        self
    }

    pub fn with_site_login(mut self, site_login: bool) -> Self {
        self.site_login = site_login;
        self
    }

    /// Whether this admin belongs in a roster load with the given parameters.
    #[must_use]
    pub fn visible_to(&self, server_id: u32, require_site_login: bool) -> bool {
        (self.servers.is_empty() || self.servers.contains(&server_id))
            && (!require_site_login || self.site_login)
    }
}

/// Groups, admins and bans to seed a store with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub groups: Vec<GroupRow>,
    #[serde(default)]
    pub admins: Vec<StoredAdmin>,
    #[serde(default)]
    pub bans: Vec<BanRow>,
}

impl Fixture {
    /// Read a JSON fixture file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
