//! Connected player sessions.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Opaque handle the host uses to address one connection.
///
/// A player who reconnects gets a new handle, so completions that arrive for
/// an old connection can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A player connection as seen by the verification engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub handle: SessionHandle,
    pub identity: Identity,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub name: String,
    /// Preferred language tag for user-visible messages, e.g. `"de"`.
    #[serde(default)]
    pub language: Option<String>,
}

impl Session {
    pub fn new(handle: SessionHandle, identity: Identity) -> Self {
        Self {
            handle,
            identity,
            address: None,
            name: String::new(),
            language: None,
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}
