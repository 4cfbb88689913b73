//! Run a unit of work under an exclusive lock

use std::future::Future;

use tracing::debug;

use warden_common::Result;

use super::context::ExclusiveLockContext;
use super::exclusive::ExclusiveLock;

/// How an [`ExclusiveBlock`] reacts to a lock held by another operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveBlockType {
    /// Try once; skip the action when the lock is taken
    SkipIfLocked,
    /// Try once; when the lock is taken, wait for its holder to finish and
    /// skip the action
    WaitForReleased,
    /// Wait for the lock, run the action while holding it
    WaitAndAcquire,
}

/// Lock-guarded execution of an action.
///
/// The lock taken for the action is always released afterwards, whether the
/// action returned `Ok` or `Err`.
pub struct ExclusiveBlock;

impl ExclusiveBlock {
    /// Run `action` according to `block_type`.
    ///
    /// Returns `Ok(None)` when the action was skipped.
    pub async fn run<F, Fut, T>(
        context: &ExclusiveLockContext,
        key: &str,
        block_type: ExclusiveBlockType,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match block_type {
            ExclusiveBlockType::SkipIfLocked => {
                let mut lock = ExclusiveLock::acquire(context, key).await?;
                if !lock.is_acquired() {
                    debug!(key = %key, "Exclusive block skipped, lock is held elsewhere");
                    return Ok(None);
                }
                let result = action().await;
                lock.release().await;
                result.map(Some)
            }
            ExclusiveBlockType::WaitForReleased => {
                let mut lock = ExclusiveLock::acquire(context, key).await?;
                if !lock.is_acquired() {
                    debug!(key = %key, "Exclusive block waits for the current holder");
                    ExclusiveLock::wait_for_released(context, key).await?;
                    return Ok(None);
                }
                let result = action().await;
                lock.release().await;
                result.map(Some)
            }
            ExclusiveBlockType::WaitAndAcquire => {
                let mut lock = ExclusiveLock::acquire_wait(context, key).await?;
                let result = action().await;
                lock.release().await;
                result.map(Some)
            }
        }
    }
}
