//! Heartbeat task keeping a held exclusive lock alive

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use warden_persistence::ExclusiveLockPersistence;

use super::context::{ExclusiveLockContext, expiration_after};

/// Background renewal of one lease.
///
/// Stops when [`LockRenewer::stop`] is called, when the renewer is dropped or
/// when the context's cancellation token fires.
pub(crate) struct LockRenewer {
    stop: CancellationToken,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl LockRenewer {
    pub(crate) fn start(context: &ExclusiveLockContext, key: &str) -> Self {
        let stop = context.cancellation().child_token();
        let handle = tokio::spawn(renew_loop(
            context.store().clone(),
            key.to_string(),
            context.operation_id().to_string(),
            context.renewal_period(),
            context.lock_timeout(),
            stop.clone(),
        ));
        Self { stop, handle }
    }

    pub(crate) fn stop(&self) {
        self.stop.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LockRenewer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn renew_loop(
    store: Arc<dyn ExclusiveLockPersistence>,
    key: String,
    operation_id: String,
    period: Duration,
    lock_timeout: Duration,
    stop: CancellationToken,
) {
    trace!(key = %key, period_ms = period.as_millis() as u64, "Lock renewer started");

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        // The lease is pushed a full timeout ahead so it outlives the next beat
        let expiration = expiration_after(lock_timeout);
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = store.refresh_exclusive_lock(&key, &operation_id, expiration) => {
                match result {
                    Ok(()) => trace!(key = %key, "Lock refreshed"),
                    Err(e) => warn!(key = %key, error = %e, "Lock refresh failed"),
                }
            }
        }
    }

    trace!(key = %key, "Lock renewer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;

    /// Counts refreshes and fails every other one
    #[derive(Default)]
    struct FlakyStore {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl ExclusiveLockPersistence for FlakyStore {
        async fn acquire_exclusive_lock(
            &self,
            _key: &str,
            _operation_id: &str,
            _expiration: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn refresh_exclusive_lock(
            &self,
            _key: &str,
            _operation_id: &str,
            _expiration: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                anyhow::bail!("store unavailable");
            }
            Ok(())
        }

        async fn release_exclusive_lock(
            &self,
            _key: &str,
            _operation_id: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn is_exclusive_locked(&self, _key: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_renewer_survives_refresh_failures() {
        let store = Arc::new(FlakyStore::default());
        let context = ExclusiveLockContext::new(store.clone())
            .with_lock_timeout(Duration::from_millis(100));

        let renewer = LockRenewer::start(&context, "key1");
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(store.refreshes.load(Ordering::SeqCst) >= 3);
        assert!(!renewer.is_finished());
        renewer.stop();
    }

    #[tokio::test]
    async fn test_renewer_stops_promptly() {
        let store = Arc::new(FlakyStore::default());
        let context = ExclusiveLockContext::new(store.clone())
            .with_lock_timeout(Duration::from_secs(60));

        let renewer = LockRenewer::start(&context, "key1");
        renewer.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(renewer.is_finished());
        assert_eq!(store.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renewer_follows_context_cancellation() {
        let store = Arc::new(FlakyStore::default());
        let cancel = CancellationToken::new();
        let context = ExclusiveLockContext::new(store)
            .with_lock_timeout(Duration::from_secs(60))
            .with_cancellation(cancel.clone());

        let renewer = LockRenewer::start(&context, "key1");
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(renewer.is_finished());
    }
}
