//! Configuration management for Warden
//!
//! Settings come from built-in defaults, an optional configuration file and
//! `WARDEN_` environment variables, in increasing order of precedence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment};

use warden_common::{
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_POLLING_INTERVAL_MS, DEFAULT_SHARED_LOCK_CLEANUP_INTERVAL_SECS,
    DEFAULT_SHARED_LOCK_TIMEOUT_SECS, DEFAULT_TREE_LOCK_TIMEOUT_SECS, DEFAULT_WAIT_TIMEOUT_MS,
};
use warden_persistence::{ExclusiveLockPersistence, StoreOptions};

use crate::lock::ExclusiveLockContext;

pub const EXCLUSIVE_LOCK_ENABLED: &str = "lock.exclusive.enabled";
pub const EXCLUSIVE_LOCK_TIMEOUT_MS: &str = "lock.exclusive.timeout_ms";
pub const EXCLUSIVE_LOCK_POLLING_MS: &str = "lock.exclusive.polling_ms";
pub const EXCLUSIVE_LOCK_WAIT_TIMEOUT_MS: &str = "lock.exclusive.wait_timeout_ms";
pub const TREE_LOCK_TIMEOUT_SECS: &str = "lock.tree.timeout_secs";
pub const SHARED_LOCK_TIMEOUT_SECS: &str = "lock.shared.timeout_secs";
pub const SHARED_LOCK_CLEANUP_INTERVAL_SECS: &str = "lock.shared.cleanup_interval_secs";
pub const DB_URL: &str = "db.url";
pub const DB_MAX_CONNECTIONS: &str = "db.max_connections";

const DEFAULT_DB_MAX_CONNECTIONS: u64 = 10;

/// Lock subsystem configuration
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load from the optional file and the environment
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        Ok(Self::from_config(Self::builder(file)?.build()?))
    }

    /// Layered builder, open for command line overrides before `build()`
    pub fn builder(file: Option<&Path>) -> anyhow::Result<ConfigBuilder<DefaultState>> {
        layered(file, environment())
    }

    // ========================================================================
    // Exclusive Lock Configuration
    // ========================================================================

    pub fn exclusive_lock_enabled(&self) -> bool {
        self.config.get_bool(EXCLUSIVE_LOCK_ENABLED).unwrap_or(true)
    }

    pub fn exclusive_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.positive(EXCLUSIVE_LOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS))
    }

    pub fn exclusive_lock_polling_interval(&self) -> Duration {
        Duration::from_millis(self.positive(EXCLUSIVE_LOCK_POLLING_MS, DEFAULT_POLLING_INTERVAL_MS))
    }

    pub fn exclusive_lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.positive(EXCLUSIVE_LOCK_WAIT_TIMEOUT_MS, DEFAULT_WAIT_TIMEOUT_MS))
    }

    /// Context for one exclusive lock attempt with a fresh operation id
    pub fn exclusive_lock_context(
        &self,
        store: Arc<dyn ExclusiveLockPersistence>,
    ) -> ExclusiveLockContext {
        ExclusiveLockContext::new(store)
            .with_lock_timeout(self.exclusive_lock_timeout())
            .with_polling_interval(self.exclusive_lock_polling_interval())
            .with_wait_timeout(self.exclusive_lock_wait_timeout())
            .with_enabled(self.exclusive_lock_enabled())
    }

    // ========================================================================
    // Tree & Shared Lock Configuration
    // ========================================================================

    pub fn tree_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.positive(TREE_LOCK_TIMEOUT_SECS, DEFAULT_TREE_LOCK_TIMEOUT_SECS))
    }

    pub fn shared_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.positive(SHARED_LOCK_TIMEOUT_SECS, DEFAULT_SHARED_LOCK_TIMEOUT_SECS))
    }

    pub fn shared_lock_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.positive(
            SHARED_LOCK_CLEANUP_INTERVAL_SECS,
            DEFAULT_SHARED_LOCK_CLEANUP_INTERVAL_SECS,
        ))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            tree_lock_timeout: self.tree_lock_timeout(),
            shared_lock_timeout: self.shared_lock_timeout(),
        }
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    pub fn database_url(&self) -> Option<String> {
        self.config
            .get_string(DB_URL)
            .ok()
            .filter(|url| !url.is_empty())
    }

    pub fn database_max_connections(&self) -> u32 {
        self.positive(DB_MAX_CONNECTIONS, DEFAULT_DB_MAX_CONNECTIONS)
            .min(u32::MAX as u64) as u32
    }

    /// Positive integer setting; missing, malformed or non-positive values
    /// fall back to `default`
    fn positive(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .filter(|value| *value > 0)
            .map(|value| value as u64)
            .unwrap_or(default)
    }
}

fn environment() -> Environment {
    Environment::with_prefix("warden")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn layered(
    file: Option<&Path>,
    environment: Environment,
) -> anyhow::Result<ConfigBuilder<DefaultState>> {
    let mut builder = Config::builder()
        .set_default(EXCLUSIVE_LOCK_ENABLED, true)?
        .set_default(EXCLUSIVE_LOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS)?
        .set_default(EXCLUSIVE_LOCK_POLLING_MS, DEFAULT_POLLING_INTERVAL_MS)?
        .set_default(EXCLUSIVE_LOCK_WAIT_TIMEOUT_MS, DEFAULT_WAIT_TIMEOUT_MS)?
        .set_default(TREE_LOCK_TIMEOUT_SECS, DEFAULT_TREE_LOCK_TIMEOUT_SECS)?
        .set_default(SHARED_LOCK_TIMEOUT_SECS, DEFAULT_SHARED_LOCK_TIMEOUT_SECS)?
        .set_default(
            SHARED_LOCK_CLEANUP_INTERVAL_SECS,
            DEFAULT_SHARED_LOCK_CLEANUP_INTERVAL_SECS,
        )?
        .set_default(DB_MAX_CONNECTIONS, DEFAULT_DB_MAX_CONNECTIONS)?;

    if let Some(file) = file {
        builder = builder.add_source(config::File::from(file).required(true));
    }

    Ok(builder.add_source(environment))
}
