//! Tree lock controller
//!
//! Locks a set of repository paths together. Each path is requested
//! separately and concurrently; the set is granted only when every path is,
//! otherwise everything obtained is rolled back before the error surfaces.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use warden_common::{LockError, Result};
use warden_persistence::{TreeLockEntry, TreeLockPersistence};

/// Entry point for path locks
#[derive(Clone)]
pub struct TreeLocker {
    store: Arc<dyn TreeLockPersistence>,
}

impl TreeLocker {
    pub fn new(store: Arc<dyn TreeLockPersistence>) -> Self {
        Self { store }
    }

    /// Lock every path in `paths` or none of them
    pub async fn acquire<S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        paths: &[S],
    ) -> Result<TreeLock> {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled);
        }

        let results = join_all(
            paths
                .iter()
                .map(|path| self.store.acquire_tree_lock(path.as_ref())),
        )
        .await;

        let mut granted = Vec::with_capacity(results.len());
        let mut conflict: Option<&str> = None;
        let mut store_error: Option<anyhow::Error> = None;
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(0) => {
                    conflict.get_or_insert(path.as_ref());
                }
                Ok(id) => granted.push(id),
                Err(e) => {
                    store_error.get_or_insert(e);
                }
            }
        }

        let failure = if cancel.is_cancelled() {
            Some(LockError::Cancelled)
        } else if let Some(e) = store_error {
            Some(LockError::StoreUnavailable(e))
        } else {
            conflict.map(|path| LockError::TreeLocked {
                path: path.to_string(),
            })
        };

        if let Some(failure) = failure {
            self.roll_back(&granted).await;
            debug!(error = %failure, "Tree lock not granted");
            return Err(failure);
        }

        debug!(lock_ids = ?granted, "Tree lock acquired");
        Ok(TreeLock {
            store: self.store.clone(),
            lock_ids: granted,
            paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
            released: false,
        })
    }

    /// Fail with `TreeLocked` on the first path that is currently locked
    pub async fn assert_free<S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        paths: &[S],
    ) -> Result<()> {
        for path in paths {
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled);
            }
            if self.store.is_tree_locked(path.as_ref()).await? {
                return Err(LockError::TreeLocked {
                    path: path.as_ref().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Every live path lock ordered by id
    pub async fn all_locks(&self) -> Result<Vec<TreeLockEntry>> {
        Ok(self.store.load_all_tree_locks().await?)
    }

    /// Release the given lock ids, e.g. ones left behind by a crashed holder
    pub async fn release_ids(&self, lock_ids: &[i32]) -> Result<()> {
        Ok(self.store.release_tree_locks(lock_ids).await?)
    }

    async fn roll_back(&self, granted: &[i32]) {
        if granted.is_empty() {
            return;
        }
        if let Err(e) = self.store.release_tree_locks(granted).await {
            warn!(lock_ids = ?granted, error = %e, "Tree lock rollback failed, locks will go stale");
        }
    }
}

/// A granted set of path locks.
///
/// Call [`TreeLock::release`] to give the paths back; a handle dropped
/// without release fires the release on the current runtime.
pub struct TreeLock {
    store: Arc<dyn TreeLockPersistence>,
    lock_ids: Vec<i32>,
    paths: Vec<String>,
    released: bool,
}

impl TreeLock {
    pub fn lock_ids(&self) -> &[i32] {
        &self.lock_ids
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Release every path lock in one batch, waiting for the store
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        if !self.lock_ids.is_empty() {
            self.store.release_tree_locks(&self.lock_ids).await?;
            debug!(lock_ids = ?self.lock_ids, "Tree lock released");
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        if self.released || self.lock_ids.is_empty() {
            return;
        }

        let store = self.store.clone();
        let lock_ids = std::mem::take(&mut self.lock_ids);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match store.release_tree_locks(&lock_ids).await {
                        Ok(()) => debug!(lock_ids = ?lock_ids, "Tree lock released on drop"),
                        Err(e) => {
                            warn!(lock_ids = ?lock_ids, error = %e, "Tree lock release on drop failed")
                        }
                    }
                });
            }
            Err(_) => {
                warn!(lock_ids = ?lock_ids, "Tree lock dropped outside a runtime, locks will go stale")
            }
        }
    }
}

impl std::fmt::Debug for TreeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeLock")
            .field("lock_ids", &self.lock_ids)
            .field("paths", &self.paths)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use warden_persistence::MemoryLockStore;

    use super::*;

    fn locker() -> (Arc<MemoryLockStore>, TreeLocker) {
        let store = Arc::new(MemoryLockStore::default());
        (store.clone(), TreeLocker::new(store))
    }

    /// Grants paths from a memory store and fires the token once one is granted
    struct CancellingStore {
        inner: MemoryLockStore,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl TreeLockPersistence for CancellingStore {
        async fn acquire_tree_lock(&self, path: &str) -> anyhow::Result<i32> {
            let id = self.inner.acquire_tree_lock(path).await?;
            self.cancel.cancel();
            Ok(id)
        }

        async fn release_tree_locks(&self, lock_ids: &[i32]) -> anyhow::Result<()> {
            self.inner.release_tree_locks(lock_ids).await
        }

        async fn is_tree_locked(&self, path: &str) -> anyhow::Result<bool> {
            self.inner.is_tree_locked(path).await
        }

        async fn load_all_tree_locks(&self) -> anyhow::Result<Vec<TreeLockEntry>> {
            self.inner.load_all_tree_locks().await
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (store, locker) = locker();
        let cancel = CancellationToken::new();

        let mut lock = locker
            .acquire(&cancel, &["/Root/A", "/Root/B"])
            .await
            .unwrap();
        assert_eq!(lock.lock_ids().len(), 2);
        assert_eq!(lock.paths(), ["/Root/A", "/Root/B"]);
        assert!(store.is_tree_locked("/root/a/child").await.unwrap());

        lock.release().await.unwrap();
        lock.release().await.unwrap();
        assert!(store.load_all_tree_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_rolls_back_granted_paths() {
        let (store, locker) = locker();
        let cancel = CancellationToken::new();

        let mut holder = locker.acquire(&cancel, &["/Root/B/Doc"]).await.unwrap();

        let err = locker
            .acquire(&cancel, &["/Root/A", "/Root/B", "/Root/C"])
            .await
            .unwrap_err();
        match err {
            LockError::TreeLocked { path } => assert_eq!(path, "/Root/B"),
            other => panic!("unexpected error: {other:?}"),
        }

        let all = store.load_all_tree_locks().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, holder.lock_ids()[0]);

        holder.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_paths_in_one_request_conflict() {
        let (store, locker) = locker();
        let cancel = CancellationToken::new();

        assert!(matches!(
            locker.acquire(&cancel, &["/Root/A", "/Root/A/B"]).await,
            Err(LockError::TreeLocked { .. })
        ));
        assert!(store.load_all_tree_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let (store, locker) = locker();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            locker.acquire(&cancel, &["/Root/A"]).await,
            Err(LockError::Cancelled)
        ));
        assert!(locker.assert_free(&cancel, &["/Root/A"]).await.is_err());
        assert!(store.load_all_tree_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_after_dispatch_rolls_back() {
        let cancel = CancellationToken::new();
        let store = Arc::new(CancellingStore {
            inner: MemoryLockStore::default(),
            cancel: cancel.clone(),
        });
        let locker = TreeLocker::new(store.clone());

        assert!(matches!(
            locker.acquire(&cancel, &["/Root/A", "/Root/B"]).await,
            Err(LockError::Cancelled)
        ));
        assert!(store.load_all_tree_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assert_free() {
        let (_store, locker) = locker();
        let cancel = CancellationToken::new();
        let mut lock = locker.acquire(&cancel, &["/Root/A/B"]).await.unwrap();

        locker.assert_free(&cancel, &["/Root/AB", "/Root/C"]).await.unwrap();
        match locker.assert_free(&cancel, &["/Root/C", "/Root"]).await {
            Err(LockError::TreeLocked { path }) => assert_eq!(path, "/Root"),
            other => panic!("unexpected result: {other:?}"),
        }

        lock.release().await.unwrap();
        locker.assert_free(&cancel, &["/Root"]).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases_paths() {
        let (store, locker) = locker();
        let cancel = CancellationToken::new();
        {
            let _lock = locker.acquire(&cancel, &["/Root/A"]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.load_all_tree_locks().await.unwrap().is_empty());
        assert!(locker.all_locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_request_yields_empty_handle() {
        let (_store, locker) = locker();
        let cancel = CancellationToken::new();
        let paths: [&str; 0] = [];

        let mut lock = locker.acquire(&cancel, &paths).await.unwrap();
        assert!(lock.lock_ids().is_empty());
        lock.release().await.unwrap();
    }
}
