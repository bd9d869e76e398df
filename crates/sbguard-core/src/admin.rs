//! Admin roster model and roster building.
//!
//! The store hands back two row sets: server groups and per-admin rows. A
//! [`Roster`] is built from both in one pass and is only ever replaced as a
//! whole, never patched.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::Identity;

// =============================================================================
// Admin Flags
// =============================================================================

/// Set of single-character permission flags, e.g. `"bcdz"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AdminFlags(BTreeSet<char>);

impl AdminFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a flag string. Whitespace is ignored, duplicates collapse.
    #[must_use]
    pub fn parse(flags: &str) -> Self {
        Self(flags.chars().filter(|c| !c.is_whitespace()).collect())
    }

    #[must_use]
    pub fn contains(&self, flag: char) -> bool {
        self.0.contains(&flag)
    }

    /// Union `other` into `self`.
    pub fn merge(&mut self, other: &AdminFlags) {
        self.0.extend(other.0.iter().copied());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = char> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for AdminFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in &self.0 {
            write!(f, "{flag}")?;
        }
        Ok(())
    }
}

impl From<String> for AdminFlags {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for AdminFlags {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<AdminFlags> for String {
    fn from(flags: AdminFlags) -> Self {
        flags.to_string()
    }
}

// =============================================================================
// Admin Record / Roster
// =============================================================================

/// Privileges granted to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRecord {
    pub identity: Identity,
    pub flags: AdminFlags,
    pub immunity: i32,
}

/// Immutable snapshot of every admin known to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    admins: HashMap<Identity, AdminRecord>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&AdminRecord> {
        self.admins.get(identity)
    }

    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.admins.contains_key(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.admins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdminRecord> {
        self.admins.values()
    }

    /// Insert a record, merging with an existing one for the same identity.
    pub fn insert(&mut self, record: AdminRecord) {
        match self.admins.get_mut(&record.identity) {
            Some(existing) => {
                existing.flags.merge(&record.flags);
                existing.immunity = existing.immunity.max(record.immunity);
            }
            None => {
                self.admins.insert(record.identity.clone(), record);
            }
        }
    }

    /// Build a roster from store rows.
    ///
    /// Admin rows inherit their group's flags and the higher of the two
    /// immunity levels. Rows that cannot be fully resolved are reported in
    /// [`RosterBuild::issues`] rather than failing the whole build.
    #[must_use]
    pub fn from_rows(rows: &RosterRows) -> RosterBuild {
        let groups: HashMap<&str, &GroupRow> = rows
            .groups
            .iter()
            .filter(|g| !g.name.is_empty())
            .map(|g| (g.name.as_str(), g))
            .collect();

        let mut roster = Roster::new();
        let mut issues = Vec::new();

        for row in &rows.admins {
            let identity = match Identity::parse(&row.identity) {
                Ok(identity) => identity,
                Err(e) => {
                    issues.push(e);
                    continue;
                }
            };

            let mut flags = AdminFlags::parse(&row.flags);
            let mut immunity = row.immunity;

            if let Some(group_name) = row.group.as_deref().filter(|g| !g.is_empty()) {
                match groups.get(group_name) {
                    Some(group) => {
                        flags.merge(&AdminFlags::parse(&group.flags));
                        immunity = immunity.max(group.immunity);
                    }
                    None => {
                        issues.push(CoreError::roster_inconsistent(
                            identity.as_str(),
                            group_name,
                        ));
                    }
                }
            }

            roster.insert(AdminRecord {
                identity,
                flags,
                immunity,
            });
        }

        RosterBuild { roster, issues }
    }
}

impl FromIterator<AdminRecord> for Roster {
    fn from_iter<I: IntoIterator<Item = AdminRecord>>(iter: I) -> Self {
        let mut roster = Roster::new();
        for record in iter {
            roster.insert(record);
        }
        roster
    }
}

/// Result of [`Roster::from_rows`].
#[derive(Debug, Clone)]
pub struct RosterBuild {
    pub roster: Roster,
    /// Tolerated problems found while building.
    pub issues: Vec<CoreError>,
}

// =============================================================================
// Store Rows
// =============================================================================

/// A server group as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    pub name: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub immunity: i32,
}

/// One admin row as returned by the store. The identity is unvalidated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRow {
    pub identity: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub immunity: i32,
}

/// Everything the store returns for one roster load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRows {
    #[serde(default)]
    pub groups: Vec<GroupRow>,
    #[serde(default)]
    pub admins: Vec<AdminRow>,
}
