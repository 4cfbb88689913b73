//! Domain model types for the lock store contract
//!
//! These types are used as return values from the persistence traits,
//! decoupled from specific storage backends.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use warden_common::{DEFAULT_SHARED_LOCK_TIMEOUT_SECS, DEFAULT_TREE_LOCK_TIMEOUT_SECS};

/// A live path lock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeLockEntry {
    pub id: i32,
    pub path: String,
    pub locked_at: DateTime<Utc>,
}

/// Outcome of a token-checked shared-lock write.
///
/// The store performs the token comparison atomically with the write and
/// reports what it found; the coordination layer turns the outcome into the
/// caller-facing result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SharedLockWrite {
    /// The write was applied; carries the token relevant to the caller
    Applied(String),
    /// No live shared lock exists for the content
    NotFound,
    /// A live shared lock exists with a different token
    Mismatch(String),
}

/// Existence and check-out state of a content item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentState {
    pub content_id: i32,
    /// Id of the user holding the content checked out
    pub checked_out_by: Option<i32>,
}

impl ContentState {
    pub fn is_checked_out(&self) -> bool {
        self.checked_out_by.is_some()
    }
}

/// Staleness policy owned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    /// Age after which a path lock is ignored and purged
    pub tree_lock_timeout: Duration,
    /// Validity of a shared lock since its last creation or refresh
    pub shared_lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            tree_lock_timeout: Duration::from_secs(DEFAULT_TREE_LOCK_TIMEOUT_SECS),
            shared_lock_timeout: Duration::from_secs(DEFAULT_SHARED_LOCK_TIMEOUT_SECS),
        }
    }
}

impl StoreOptions {
    /// Path locks taken at or before this instant are stale
    pub fn tree_lock_time_limit(&self) -> DateTime<Utc> {
        time_limit(self.tree_lock_timeout)
    }

    /// Shared locks created or refreshed at or before this instant are expired
    pub fn shared_lock_time_limit(&self) -> DateTime<Utc> {
        time_limit(self.shared_lock_timeout)
    }
}

fn time_limit(timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Storage mode for the persistence layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// In-process tables (single node, tests)
    Memory,
    /// External database (MySQL/PostgreSQL via SeaORM)
    ExternalDb,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Memory => write!(f, "memory"),
            StorageMode::ExternalDb => write!(f, "external_db"),
        }
    }
}
