//! Path lock persistence trait

use async_trait::async_trait;

use crate::model::TreeLockEntry;

/// Hierarchical path lock operations.
///
/// The key space is a tree: a live lock on a path blocks the path itself,
/// its ancestors and its descendants. Paths are normalized by the store.
#[async_trait]
pub trait TreeLockPersistence: Send + Sync {
    /// Lock `path`, returning the new lock id or `0` on conflict
    async fn acquire_tree_lock(&self, path: &str) -> anyhow::Result<i32>;

    /// Release the given lock ids in one batch; unknown ids are ignored
    async fn release_tree_locks(&self, lock_ids: &[i32]) -> anyhow::Result<()>;

    /// Whether a live lock conflicts with `path`
    async fn is_tree_locked(&self, path: &str) -> anyhow::Result<bool>;

    /// Every live path lock ordered by id
    async fn load_all_tree_locks(&self) -> anyhow::Result<Vec<TreeLockEntry>>;
}
