//! In-memory store backend for sbguard.
//!
//! This crate provides an in-memory implementation of the [`Store`] trait
//! from `sbguard-verify`, seeded from a JSON [`Fixture`]. It can simulate
//! outages and slow responses, which makes it the backend of choice for the
//! interactive host in `sbguard-cli` and for engine tests.
//!
//! # Example
//!
//! ```ignore
//! use sbguard_db_memory::MemoryStore;
//!
//! let store = MemoryStore::from_path(Path::new("fixtures/demo.json"))?;
//! store.set_available(false); // every call now fails as unavailable
//! ```

pub mod fixture;
pub mod store;

pub use fixture::{Fixture, StoredAdmin};
pub use sbguard_verify::{Store, StoreError};
pub use store::MemoryStore;

/// Errors loading a fixture.
#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid fixture: {0}")]
    Fixture(#[from] serde_json::Error),
}

/// Result type for fixture loading.
pub type Result<T> = std::result::Result<T, MemoryStoreError>;
