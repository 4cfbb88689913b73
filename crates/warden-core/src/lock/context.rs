//! Exclusive lock context
//!
//! Immutable per-attempt settings: who is locking, for how long, how often to
//! poll, how long to wait, which store to use and when to give up.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use warden_common::{
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_POLLING_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS, LockError,
    Result, new_operation_id,
};
use warden_persistence::ExclusiveLockPersistence;

/// Upper bound of the safety margin subtracted from half the lease
const MAX_RENEWAL_MARGIN: Duration = Duration::from_secs(1);

/// Configuration of one exclusive lock acquisition
#[derive(Clone)]
pub struct ExclusiveLockContext {
    operation_id: String,
    lock_timeout: Duration,
    polling_interval: Duration,
    wait_timeout: Duration,
    store: Arc<dyn ExclusiveLockPersistence>,
    cancellation: CancellationToken,
    enabled: bool,
}

impl ExclusiveLockContext {
    /// Create a context with default timeouts and a random operation id
    pub fn new(store: Arc<dyn ExclusiveLockPersistence>) -> Self {
        Self {
            operation_id: new_operation_id(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            wait_timeout: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            store,
            cancellation: CancellationToken::new(),
            enabled: true,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    /// Lease duration of an acquired lock absent renewal
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    /// Maximum time the waiting operations poll before giving up
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Switch the exclusive lock feature on or off for this deployment
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn store(&self) -> &Arc<dyn ExclusiveLockPersistence> {
        &self.store
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Interval between two heartbeats of a held lock.
    ///
    /// Half the lease minus a margin of a tenth of the lease (at most one
    /// second), so a single delayed heartbeat still lands before expiry.
    pub fn renewal_period(&self) -> Duration {
        let margin = (self.lock_timeout / 10).min(MAX_RENEWAL_MARGIN);
        (self.lock_timeout / 2)
            .saturating_sub(margin)
            .max(Duration::from_millis(1))
    }

    /// Check the timing invariants
    pub fn validate(&self) -> Result<()> {
        if self.operation_id.is_empty() {
            return Err(LockError::InvalidContext(
                "operation id must not be empty".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(LockError::InvalidContext(
                "lock timeout must be positive".to_string(),
            ));
        }
        if self.polling_interval.is_zero() || self.wait_timeout.is_zero() {
            return Err(LockError::InvalidContext(
                "polling interval and wait timeout must be positive".to_string(),
            ));
        }
        if self.polling_interval >= self.wait_timeout {
            return Err(LockError::InvalidContext(format!(
                "polling interval {:?} must be smaller than wait timeout {:?}",
                self.polling_interval, self.wait_timeout
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ExclusiveLockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLockContext")
            .field("operation_id", &self.operation_id)
            .field("lock_timeout", &self.lock_timeout)
            .field("polling_interval", &self.polling_interval)
            .field("wait_timeout", &self.wait_timeout)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Wall-clock instant `duration` from now, saturating at the far future
pub(crate) fn expiration_after(duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
