//! Exclusive lock handle
//!
//! A named, lease-based lock. Acquisition is a single atomic store call; the
//! waiting variants poll with the context's interval until success, timeout
//! or cancellation. A held lock keeps its lease alive through a
//! background renewer until it is released.

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use warden_common::{LockError, Result};

use super::context::{ExclusiveLockContext, expiration_after};
use super::renewer::LockRenewer;

/// Runtime handle of one exclusive lock attempt.
///
/// Both outcomes of an attempt produce a handle; only an acquired handle owns
/// a renewer. Call [`ExclusiveLock::release`] when the protected work is done.
/// A handle dropped without release stops its renewer and fires the release
/// on the current runtime.
pub struct ExclusiveLock {
    key: String,
    acquired: bool,
    context: ExclusiveLockContext,
    renewer: Option<LockRenewer>,
    released: bool,
}

impl ExclusiveLock {
    /// Try once to take the lock for `key`.
    ///
    /// A lock held by someone else is not an error: the returned handle
    /// reports `is_acquired() == false`.
    pub async fn acquire(context: &ExclusiveLockContext, key: &str) -> Result<Self> {
        context.validate()?;
        if context.cancellation().is_cancelled() {
            return Err(LockError::Cancelled);
        }

        if !context.is_enabled() {
            trace!(key = %key, "Exclusive locking is disabled, lock granted without the store");
            return Ok(Self::new(context, key, true, None));
        }

        let acquired = context
            .store()
            .acquire_exclusive_lock(
                key,
                context.operation_id(),
                expiration_after(context.lock_timeout()),
            )
            .await?;

        if !acquired {
            debug!(key = %key, operation_id = %context.operation_id(), "Exclusive lock is held by another operation");
            return Ok(Self::new(context, key, false, None));
        }

        debug!(key = %key, operation_id = %context.operation_id(), "Exclusive lock acquired");
        let renewer = LockRenewer::start(context, key);
        Ok(Self::new(context, key, true, Some(renewer)))
    }

    /// Poll until the lock is taken.
    ///
    /// Fails with `Timeout` after the context's wait timeout and with
    /// `Cancelled` when the cancellation token fires; no lease is left behind
    /// in either case.
    pub async fn acquire_wait(context: &ExclusiveLockContext, key: &str) -> Result<Self> {
        context.validate()?;
        let poller = Poller::new(context, key);

        loop {
            let mut lock = Self::acquire(context, key).await?;
            if lock.acquired {
                if context.cancellation().is_cancelled() {
                    lock.release().await;
                    return Err(LockError::Cancelled);
                }
                return Ok(lock);
            }
            poller.pause().await?;
        }
    }

    /// Poll until no live lease exists for `key`, without taking it
    pub async fn wait_for_released(context: &ExclusiveLockContext, key: &str) -> Result<()> {
        context.validate()?;
        let poller = Poller::new(context, key);

        loop {
            if context.cancellation().is_cancelled() {
                return Err(LockError::Cancelled);
            }
            if !Self::is_locked(context, key).await? {
                return Ok(());
            }
            poller.pause().await?;
        }
    }

    /// Whether a live lease exists for `key`
    pub async fn is_locked(context: &ExclusiveLockContext, key: &str) -> Result<bool> {
        if !context.is_enabled() {
            return Ok(false);
        }
        Ok(context.store().is_exclusive_locked(key).await?)
    }

    fn new(
        context: &ExclusiveLockContext,
        key: &str,
        acquired: bool,
        renewer: Option<LockRenewer>,
    ) -> Self {
        Self {
            key: key.to_string(),
            acquired,
            context: context.clone(),
            renewer,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn operation_id(&self) -> &str {
        self.context.operation_id()
    }

    /// Turn a failed attempt into a `Conflict` error
    pub fn ensure_acquired(&self) -> Result<()> {
        if self.acquired {
            Ok(())
        } else {
            Err(LockError::Conflict {
                key: self.key.clone(),
            })
        }
    }

    /// Stop the renewer and delete the lease.
    ///
    /// Effective once; later calls do nothing. Store failures are logged, the
    /// lease then simply runs out.
    pub async fn release(&mut self) {
        if !self.begin_release() {
            return;
        }

        match self
            .context
            .store()
            .release_exclusive_lock(&self.key, self.context.operation_id())
            .await
        {
            Ok(()) => debug!(key = %self.key, "Exclusive lock released"),
            Err(e) => warn!(key = %self.key, error = %e, "Exclusive lock release failed"),
        }
    }

    /// Mark the handle released and stop the renewer.
    ///
    /// Returns whether a store release is still due.
    fn begin_release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        if let Some(renewer) = self.renewer.take() {
            renewer.stop();
        }
        if !self.acquired {
            return false;
        }
        if !self.context.is_enabled() {
            trace!(key = %self.key, "Exclusive locking is disabled, nothing to release");
            return false;
        }
        true
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if !self.begin_release() {
            return;
        }

        let store = self.context.store().clone();
        let key = std::mem::take(&mut self.key);
        let operation_id = self.context.operation_id().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match store.release_exclusive_lock(&key, &operation_id).await {
                        Ok(()) => debug!(key = %key, "Exclusive lock released on drop"),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Exclusive lock release on drop failed")
                        }
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "Exclusive lock dropped outside a runtime, the lease will expire")
            }
        }
    }
}

impl std::fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("key", &self.key)
            .field("acquired", &self.acquired)
            .field("operation_id", &self.context.operation_id())
            .field("released", &self.released)
            .finish()
    }
}

/// Deadline bookkeeping shared by the waiting operations
struct Poller<'a> {
    context: &'a ExclusiveLockContext,
    key: &'a str,
    started: Instant,
    deadline: Instant,
}

impl<'a> Poller<'a> {
    fn new(context: &'a ExclusiveLockContext, key: &'a str) -> Self {
        let started = Instant::now();
        Self {
            context,
            key,
            started,
            deadline: started + context.wait_timeout(),
        }
    }

    /// Sleep one polling interval, or fail once the deadline has passed
    async fn pause(&self) -> Result<()> {
        let now = Instant::now();
        if now >= self.deadline {
            let waited = now - self.started;
            debug!(key = %self.key, waited_ms = waited.as_millis() as u64, "Timed out waiting for exclusive lock");
            return Err(LockError::Timeout {
                key: self.key.to_string(),
                waited,
            });
        }

        let pause = self.context.polling_interval().min(self.deadline - now);
        tokio::select! {
            biased;
            _ = self.context.cancellation().cancelled() => Err(LockError::Cancelled),
            _ = tokio::time::sleep(pause) => Ok(()),
        }
    }
}
