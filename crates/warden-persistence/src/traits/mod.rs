//! Lock store contract
//!
//! This module defines the persistence traits the coordination logic relies
//! on. Every operation is assumed to be network-latent and individually
//! atomic; backends: in-process tables and external database (SeaORM).

pub mod content;
pub mod exclusive;
pub mod shared;
pub mod tree;

pub use content::ContentLookup;
pub use exclusive::ExclusiveLockPersistence;
pub use shared::SharedLockPersistence;
pub use tree::TreeLockPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified lock store trait
///
/// Implemented by every backend that carries all three lock tables.
#[async_trait]
pub trait LockPersistence:
    ExclusiveLockPersistence + TreeLockPersistence + SharedLockPersistence + Send + Sync
{
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
