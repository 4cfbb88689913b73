//! Exclusive lease persistence trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Named lease operations.
///
/// A lease whose expiration has passed counts as absent: any acquirer may
/// take it over without an explicit release.
#[async_trait]
pub trait ExclusiveLockPersistence: Send + Sync {
    /// Create the lease for `key` unless a live one exists.
    ///
    /// Returns `false` without side effects when the key is held.
    async fn acquire_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Move the expiration of a live lease owned by `operation_id`.
    ///
    /// A missing, expired or foreign lease is left untouched.
    async fn refresh_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Delete the lease owned by `operation_id`, if any
    async fn release_exclusive_lock(&self, key: &str, operation_id: &str) -> anyhow::Result<()>;

    /// Whether a live lease exists for `key`
    async fn is_exclusive_locked(&self, key: &str) -> anyhow::Result<bool>;
}
