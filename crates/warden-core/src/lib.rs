//! Warden Core - Lock coordination for a clustered content repository
//!
//! This crate provides:
//! - Exclusive, tree and shared lock primitives over a pluggable lock store
//! - Configuration loading for lock timeouts and the database backend

pub mod lock;
pub mod model;

pub use lock::{
    ExclusiveBlock, ExclusiveBlockType, ExclusiveLock, ExclusiveLockContext, SharedLock, TreeLock,
    TreeLocker,
};
pub use model::Configuration;

// Re-exports for convenience
pub use tokio_util::sync::CancellationToken;
pub use warden_common::{LockError, Result};
