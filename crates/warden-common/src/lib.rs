//! Warden Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Warden components:
//! - Lock error taxonomy
//! - Repository path helpers for tree-lock conflict detection
//! - Default timeouts

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{LockError, Result};
pub use utils::{new_operation_id, normalize_path, paths_conflict};

/// Default exclusive lease duration in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Default polling interval while waiting for an exclusive lock
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 500;

/// Default maximum wait for an exclusive lock
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Age after which a path lock is considered abandoned
pub const DEFAULT_TREE_LOCK_TIMEOUT_SECS: u64 = 30 * 60;

/// Validity of a shared lock since its last creation or refresh
pub const DEFAULT_SHARED_LOCK_TIMEOUT_SECS: u64 = 30 * 60;

/// Period of the background shared-lock cleanup task
pub const DEFAULT_SHARED_LOCK_CLEANUP_INTERVAL_SECS: u64 = 10 * 60;
