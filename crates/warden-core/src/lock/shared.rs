//! Shared (token) locks on content items
//!
//! Stateless request/response calls: a content item is locked with an opaque
//! token and every later mutation must present the same token. There is no
//! handle and no renewal; a lock simply expires unless refreshed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_common::{LockError, Result};
use warden_persistence::{ContentLookup, SharedLockPersistence, SharedLockWrite};

/// Shared lock service
#[derive(Clone)]
pub struct SharedLock {
    store: Arc<dyn SharedLockPersistence>,
    contents: Arc<dyn ContentLookup>,
}

impl SharedLock {
    pub fn new(store: Arc<dyn SharedLockPersistence>, contents: Arc<dyn ContentLookup>) -> Self {
        Self { store, contents }
    }

    /// Lock the content with `lock`, or refresh it if `lock` already holds it.
    ///
    /// Fails when the content does not exist, is checked out, or is locked
    /// with another token.
    pub async fn lock(&self, content_id: i32, lock: &str) -> Result<()> {
        require_token(lock)?;

        let state = self
            .contents
            .content_state(content_id)
            .await?
            .ok_or(LockError::ContentNotFound(content_id))?;
        if state.is_checked_out() {
            return Err(LockError::ContentLocked(content_id));
        }

        let outcome = self.store.create_shared_lock(content_id, lock).await?;
        resolve(content_id, outcome)?;
        debug!(content_id, "Shared lock taken");
        Ok(())
    }

    /// Restart the validity of the lock, returning its token
    pub async fn refresh_lock(&self, content_id: i32, lock: &str) -> Result<String> {
        require_token(lock)?;
        let outcome = self.store.refresh_shared_lock(content_id, lock).await?;
        resolve(content_id, outcome)
    }

    /// Swap `lock` for `new_lock`, returning the new token
    pub async fn modify_lock(&self, content_id: i32, lock: &str, new_lock: &str) -> Result<String> {
        require_token(lock)?;
        require_token(new_lock)?;
        let outcome = self
            .store
            .modify_shared_lock(content_id, lock, new_lock)
            .await?;
        let token = resolve(content_id, outcome)?;
        debug!(content_id, "Shared lock modified");
        Ok(token)
    }

    /// Current token, `None` when the content is not locked
    pub async fn get_lock(&self, content_id: i32) -> Result<Option<String>> {
        Ok(self.store.get_shared_lock(content_id).await?)
    }

    /// Remove the lock held with `lock`, returning the removed token
    pub async fn unlock(&self, content_id: i32, lock: &str) -> Result<String> {
        require_token(lock)?;
        let outcome = self.store.delete_shared_lock(content_id, lock).await?;
        let token = resolve(content_id, outcome)?;
        debug!(content_id, "Shared lock removed");
        Ok(token)
    }

    /// Drop every shared lock
    pub async fn remove_all_locks(&self) -> Result<u64> {
        let removed = self.store.delete_all_shared_locks().await?;
        info!(removed, "All shared locks removed");
        Ok(removed)
    }

    /// Purge expired shared locks
    pub async fn cleanup(&self) -> Result<u64> {
        Ok(self.store.cleanup_shared_locks().await?)
    }

    /// Run [`SharedLock::cleanup`] every `period` until `cancel` fires.
    ///
    /// The first purge happens one period after the start.
    pub fn start_cleanup(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match this.cleanup().await {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "Expired shared locks removed"),
                            Err(e) => warn!(error = %e, "Shared lock cleanup failed"),
                        }
                    }
                }
            }

            debug!("Shared lock cleanup stopped");
        })
    }
}

fn require_token(lock: &str) -> Result<()> {
    if lock.is_empty() {
        return Err(LockError::InvalidArgument(
            "shared lock token must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn resolve(content_id: i32, outcome: SharedLockWrite) -> Result<String> {
    match outcome {
        SharedLockWrite::Applied(token) => Ok(token),
        SharedLockWrite::NotFound => Err(LockError::SharedLockNotFound(content_id)),
        SharedLockWrite::Mismatch(current) => Err(LockError::OwnershipMismatch {
            content_id,
            current,
        }),
    }
}
