//! Command implementations
//!
//! Every command produces an [`Output`] carrying both a JSON document and a
//! human-readable rendering; `main` prints whichever was asked for.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{info, warn};

use warden_core::{CancellationToken, Configuration, ExclusiveLock, SharedLock, TreeLocker};
use warden_persistence::{LockPersistence, MemoryContentStore, SqlLockStore};

use crate::cli::{Command, ExclusiveAction, SharedAction, TreeAction};

/// Result of one command
#[derive(Debug)]
pub struct Output {
    pub json: Value,
    pub text: String,
}

impl Output {
    fn new(json: Value, text: impl Into<String>) -> Self {
        Self {
            json,
            text: text.into(),
        }
    }
}

pub async fn dispatch(
    command: Command,
    store: Arc<SqlLockStore>,
    config: &Configuration,
) -> anyhow::Result<Output> {
    match command {
        Command::Install => install(&store).await,
        Command::Shared(action) => shared(action, store, config).await,
        Command::Tree(action) => tree(action, store).await,
        Command::Exclusive(ExclusiveAction::Status { key }) => {
            exclusive_status(&key, store, config).await
        }
    }
}

async fn install(store: &SqlLockStore) -> anyhow::Result<Output> {
    store.health_check().await?;
    store.install().await?;
    info!(storage = %store.storage_mode(), "Lock tables installed");
    Ok(Output::new(
        json!({ "installed": true }),
        "Lock tables installed",
    ))
}

async fn shared(
    action: SharedAction,
    store: Arc<SqlLockStore>,
    config: &Configuration,
) -> anyhow::Result<Output> {
    // Maintenance calls never resolve content items
    let shared = SharedLock::new(store, Arc::new(MemoryContentStore::new()));

    match action {
        SharedAction::Cleanup => {
            let removed = shared.cleanup().await?;
            Ok(Output::new(
                json!({ "removed": removed }),
                format!("Removed {removed} expired shared lock(s)"),
            ))
        }
        SharedAction::RemoveAll { force } => {
            if !force {
                anyhow::bail!("refusing to remove every shared lock without --force");
            }
            let removed = shared.remove_all_locks().await?;
            Ok(Output::new(
                json!({ "removed": removed }),
                format!("Removed {removed} shared lock(s)"),
            ))
        }
        SharedAction::Get { content_id } => {
            let token = shared.get_lock(content_id).await?;
            let text = match &token {
                Some(token) => format!("Content #{content_id} is locked with '{token}'"),
                None => format!("Content #{content_id} is not locked"),
            };
            Ok(Output::new(
                json!({ "contentId": content_id, "lock": token }),
                text,
            ))
        }
        SharedAction::Watch => {
            watch(&shared, config.shared_lock_cleanup_interval(), shutdown_signal()).await
        }
    }
}

/// Run the periodic shared lock cleanup until `shutdown` completes
async fn watch(
    shared: &SharedLock,
    period: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<Output> {
    let cancel = CancellationToken::new();
    let handle = shared.start_cleanup(period, cancel.clone());
    info!(interval_secs = period.as_secs(), "Shared lock cleanup running");

    shutdown.await;
    cancel.cancel();
    handle.await?;

    Ok(Output::new(
        json!({ "stopped": true, "intervalSecs": period.as_secs() }),
        "Shared lock cleanup stopped",
    ))
}

/// Completes on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

async fn tree(action: TreeAction, store: Arc<SqlLockStore>) -> anyhow::Result<Output> {
    let locker = TreeLocker::new(store);

    match action {
        TreeAction::List => {
            let locks = locker.all_locks().await?;
            let text = if locks.is_empty() {
                "No path locks".to_string()
            } else {
                locks
                    .iter()
                    .map(|lock| {
                        format!(
                            "{:>8}  {}  {}",
                            lock.id,
                            lock.locked_at.format("%Y-%m-%d %H:%M:%S"),
                            lock.path
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            Ok(Output::new(serde_json::to_value(&locks)?, text))
        }
        TreeAction::Release { lock_ids } => {
            locker.release_ids(&lock_ids).await?;
            info!(lock_ids = ?lock_ids, "Path locks released");
            Ok(Output::new(
                json!({ "released": lock_ids }),
                format!("Released {} path lock id(s)", lock_ids.len()),
            ))
        }
    }
}

async fn exclusive_status(
    key: &str,
    store: Arc<SqlLockStore>,
    config: &Configuration,
) -> anyhow::Result<Output> {
    let context = config.exclusive_lock_context(store);
    let locked = ExclusiveLock::is_locked(&context, key).await?;

    let text = match (context.is_enabled(), locked) {
        (false, _) => format!("Exclusive locking is disabled; '{key}' is never locked"),
        (true, true) => format!("'{key}' is locked"),
        (true, false) => format!("'{key}' is free"),
    };
    Ok(Output::new(
        json!({ "key": key, "enabled": context.is_enabled(), "locked": locked }),
        text,
    ))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use warden_core::model::SHARED_LOCK_CLEANUP_INTERVAL_SECS;
    use warden_persistence::{
        ExclusiveLockPersistence, SharedLockPersistence, StoreOptions, TreeLockPersistence,
    };

    use super::*;

    async fn store() -> Arc<SqlLockStore> {
        let store = SqlLockStore::connect("sqlite::memory:", 1, StoreOptions::default())
            .await
            .unwrap();
        let store = Arc::new(store);
        install(&store).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_tree_list_and_release() {
        let store = store().await;
        let id = store.acquire_tree_lock("/Root/A").await.unwrap();

        let output = tree(TreeAction::List, store.clone()).await.unwrap();
        assert_eq!(output.json[0]["id"], id);
        assert_eq!(output.json[0]["path"], "/root/a");
        assert!(output.text.contains("/root/a"));

        tree(TreeAction::Release { lock_ids: vec![id] }, store.clone())
            .await
            .unwrap();
        let output = tree(TreeAction::List, store).await.unwrap();
        assert_eq!(output.json, json!([]));
    }

    #[tokio::test]
    async fn test_shared_commands() {
        let store = store().await;
        store.create_shared_lock(9, "t1").await.unwrap();

        let config = Configuration::default();
        let output = shared(SharedAction::Get { content_id: 9 }, store.clone(), &config)
            .await
            .unwrap();
        assert_eq!(output.json["lock"], "t1");

        assert!(
            shared(SharedAction::RemoveAll { force: false }, store.clone(), &config)
                .await
                .is_err()
        );
        let output = shared(SharedAction::RemoveAll { force: true }, store.clone(), &config)
            .await
            .unwrap();
        assert_eq!(output.json["removed"], 1);

        let output = shared(SharedAction::Cleanup, store, &config).await.unwrap();
        assert_eq!(output.json["removed"], 0);
    }

    #[tokio::test]
    async fn test_watch_purges_expired_locks() {
        let store = SqlLockStore::connect(
            "sqlite::memory:",
            1,
            StoreOptions {
                shared_lock_timeout: Duration::from_millis(100),
                ..StoreOptions::default()
            },
        )
        .await
        .unwrap();
        let store = Arc::new(store);
        install(&store).await.unwrap();
        store.create_shared_lock(3, "t1").await.unwrap();

        let config = Configuration::from_config(
            Configuration::builder(None)
                .unwrap()
                .set_override(SHARED_LOCK_CLEANUP_INTERVAL_SECS, 1i64)
                .unwrap()
                .build()
                .unwrap(),
        );
        let shared = SharedLock::new(store.clone(), Arc::new(MemoryContentStore::new()));
        let output = watch(
            &shared,
            config.shared_lock_cleanup_interval(),
            tokio::time::sleep(Duration::from_millis(1500)),
        )
        .await
        .unwrap();
        assert_eq!(output.json["intervalSecs"], 1);

        // The expired row is gone, not just hidden
        assert_eq!(store.delete_all_shared_locks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_status() {
        let store = store().await;
        store
            .acquire_exclusive_lock("reindex", "op1", Utc::now() + TimeDelta::seconds(60))
            .await
            .unwrap();

        let config = Configuration::default();
        let output = exclusive_status("reindex", store.clone(), &config)
            .await
            .unwrap();
        assert_eq!(output.json["locked"], true);

        let output = exclusive_status("other", store, &config).await.unwrap();
        assert_eq!(output.json["locked"], false);
    }
}
