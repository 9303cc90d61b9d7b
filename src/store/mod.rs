//! Persistence for mirrored user records.
//!
//! The store is opened once at startup and handed to the dispatcher as an
//! `Arc<dyn UserStore>`. Every operation touches exactly one document and is
//! atomic on its own; nothing here spans documents.

mod memory;
mod redb_store;

pub use memory::MemoryUserStore;
pub use redb_store::RedbUserStore;

use crate::model::{UserProfile, UserRecord};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a [`UserStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user '{id}' already exists")]
    Duplicate { id: String },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("failed to (de)serialize user document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("invalid database url '{0}'")]
    InvalidLocation(String),
}

impl StoreError {
    pub(crate) fn backend(err: impl fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Single-document operations on the user collection.
///
/// `update` and `delete` treat a missing id as a normal outcome (`None` /
/// `false`) rather than an error. A write is durable once the call returns;
/// there is nothing to flush on shutdown.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Insert a new record; fails with [`StoreError::Duplicate`] when the id is taken.
    async fn create(&self, id: &str, profile: UserProfile) -> Result<UserRecord, StoreError>;

    /// Overwrite the provider-owned profile fields of an existing record.
    async fn update(&self, id: &str, profile: UserProfile)
    -> Result<Option<UserRecord>, StoreError>;

    /// Remove a record; returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// Where user documents live, parsed from the configured database url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// `memory://`: process-local, lost on exit.
    Memory,
    /// `redb://<path>` or a bare filesystem path.
    Redb(PathBuf),
}

impl FromStr for StoreLocation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidLocation(s.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("memory://") {
            return if rest.is_empty() {
                Ok(StoreLocation::Memory)
            } else {
                Err(StoreError::InvalidLocation(s.to_string()))
            };
        }
        if let Some(path) = trimmed.strip_prefix("redb://") {
            if path.is_empty() {
                return Err(StoreError::InvalidLocation(s.to_string()));
            }
            return Ok(StoreLocation::Redb(PathBuf::from(path)));
        }
        if trimmed.contains("://") {
            return Err(StoreError::InvalidLocation(s.to_string()));
        }
        Ok(StoreLocation::Redb(PathBuf::from(trimmed)))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Memory => write!(f, "memory://"),
            StoreLocation::Redb(path) => write!(f, "redb://{}", path.display()),
        }
    }
}

/// Open the store named by `location`.
pub fn open(location: &StoreLocation) -> Result<Arc<dyn UserStore>, StoreError> {
    match location {
        StoreLocation::Memory => Ok(Arc::new(MemoryUserStore::new())),
        StoreLocation::Redb(path) => Ok(Arc::new(RedbUserStore::open(path)?)),
    }
}
