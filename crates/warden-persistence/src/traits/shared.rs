//! Shared lock persistence trait
//!
//! Every mutation compares the supplied token with the stored one inside the
//! same atomic store operation. Expired rows behave as absent.

use async_trait::async_trait;

use crate::model::SharedLockWrite;

/// Token-based shared lock operations keyed by content id
#[async_trait]
pub trait SharedLockPersistence: Send + Sync {
    /// Create the lock, or refresh it when the same token already holds it.
    ///
    /// Never returns `NotFound`.
    async fn create_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite>;

    /// Restart the validity of a lock held with `lock`
    async fn refresh_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite>;

    /// Replace `lock` with `new_lock` (compare-and-swap)
    async fn modify_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
        new_lock: &str,
    ) -> anyhow::Result<SharedLockWrite>;

    /// Current token of a live lock
    async fn get_shared_lock(&self, content_id: i32) -> anyhow::Result<Option<String>>;

    /// Delete the lock if it is held with `lock`
    async fn delete_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite>;

    /// Delete every shared lock, returning the number of rows removed
    async fn delete_all_shared_locks(&self) -> anyhow::Result<u64>;

    /// Delete expired shared locks, returning the number of rows removed
    async fn cleanup_shared_locks(&self) -> anyhow::Result<u64>;
}
