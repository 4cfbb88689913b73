//! Integration tests for the SQL lock store
//!
//! Runs the SeaORM backend against an in-memory SQLite database.

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use warden_persistence::{
    ExclusiveLockPersistence, LockPersistence, SharedLockPersistence, SharedLockWrite,
    SqlLockStore, StorageMode, StoreOptions, TreeLockPersistence,
};

async fn sqlite_store(options: StoreOptions) -> SqlLockStore {
    // One connection: every pooled SQLite memory connection is its own database
    let store = SqlLockStore::connect("sqlite::memory:", 1, options)
        .await
        .expect("sqlite connection");
    store.install().await.expect("install lock tables");
    store
}

// ============================================================================
// Exclusive lease Tests
// ============================================================================

#[tokio::test]
async fn test_exclusive_lock_unique_acquire() {
    let store = sqlite_store(StoreOptions::default()).await;
    let expiration = Utc::now() + TimeDelta::seconds(60);

    assert!(
        store
            .acquire_exclusive_lock("reindex", "op1", expiration)
            .await
            .unwrap()
    );
    assert!(
        !store
            .acquire_exclusive_lock("reindex", "op2", expiration)
            .await
            .unwrap()
    );
    assert!(store.is_exclusive_locked("reindex").await.unwrap());
}

#[tokio::test]
async fn test_exclusive_lock_expired_row_is_replaced() {
    let store = sqlite_store(StoreOptions::default()).await;

    assert!(
        store
            .acquire_exclusive_lock("reindex", "op1", Utc::now() - TimeDelta::seconds(1))
            .await
            .unwrap()
    );
    assert!(!store.is_exclusive_locked("reindex").await.unwrap());
    assert!(
        store
            .acquire_exclusive_lock("reindex", "op2", Utc::now() + TimeDelta::seconds(60))
            .await
            .unwrap()
    );

    // The former holder can neither extend nor release the new lease
    store
        .refresh_exclusive_lock("reindex", "op1", Utc::now() + TimeDelta::hours(1))
        .await
        .unwrap();
    store.release_exclusive_lock("reindex", "op1").await.unwrap();
    assert!(store.is_exclusive_locked("reindex").await.unwrap());

    store.release_exclusive_lock("reindex", "op2").await.unwrap();
    assert!(!store.is_exclusive_locked("reindex").await.unwrap());
}

// ============================================================================
// Path lock Tests
// ============================================================================

#[tokio::test]
async fn test_tree_lock_conflicts() {
    let store = sqlite_store(StoreOptions::default()).await;

    let id = store.acquire_tree_lock("/Root/Sites/Default_Site").await.unwrap();
    assert!(id > 0);

    assert_eq!(store.acquire_tree_lock("/Root/Sites").await.unwrap(), 0);
    assert_eq!(
        store
            .acquire_tree_lock("/Root/Sites/Default_Site/Docs")
            .await
            .unwrap(),
        0
    );
    assert!(
        store
            .acquire_tree_lock("/Root/Sites/DefaultXSite/Docs")
            .await
            .unwrap()
            > 0
    );
    assert!(store.acquire_tree_lock("/Root/Sites/Default_Site2").await.unwrap() > 0);
    assert!(store.is_tree_locked("/root/sites/default_site/x").await.unwrap());

    store.release_tree_locks(&[id]).await.unwrap();
    assert!(!store.is_tree_locked("/Root/Sites/Default_Site").await.unwrap());

    // '_' in the new path is literal: DefaultXSite/Docs must not match it
    let id = store.acquire_tree_lock("/Root/Sites/Default_Site").await.unwrap();
    assert!(id > 0);

    let all = store.load_all_tree_locks().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].path, "/root/sites/defaultxsite/docs");
    assert_eq!(all[2].id, id);

    store.release_tree_locks(&[]).await.unwrap();
}

#[tokio::test]
async fn test_tree_lock_stale_rows_are_purged() {
    let store = sqlite_store(StoreOptions {
        tree_lock_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .await;

    assert!(store.acquire_tree_lock("/Root/A").await.unwrap() > 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(store.acquire_tree_lock("/Root/A/B").await.unwrap() > 0);
    assert_eq!(store.load_all_tree_locks().await.unwrap().len(), 1);
}

// ============================================================================
// Shared lock Tests
// ============================================================================

#[tokio::test]
async fn test_shared_lock_compare_and_swap() {
    let store = sqlite_store(StoreOptions::default()).await;

    assert_eq!(
        store.create_shared_lock(7, "t1").await.unwrap(),
        SharedLockWrite::Applied("t1".to_string())
    );
    // Same token refreshes, different token is rejected
    assert_eq!(
        store.create_shared_lock(7, "t1").await.unwrap(),
        SharedLockWrite::Applied("t1".to_string())
    );
    assert_eq!(
        store.create_shared_lock(7, "other").await.unwrap(),
        SharedLockWrite::Mismatch("t1".to_string())
    );

    assert_eq!(
        store.modify_shared_lock(7, "wrong", "t2").await.unwrap(),
        SharedLockWrite::Mismatch("t1".to_string())
    );
    assert_eq!(store.get_shared_lock(7).await.unwrap(), Some("t1".to_string()));

    assert_eq!(
        store.modify_shared_lock(7, "t1", "t2").await.unwrap(),
        SharedLockWrite::Applied("t2".to_string())
    );
    assert_eq!(store.get_shared_lock(7).await.unwrap(), Some("t2".to_string()));

    // A wrong old token is rejected even when the new token is already stored
    assert_eq!(
        store.modify_shared_lock(7, "wrong", "t2").await.unwrap(),
        SharedLockWrite::Mismatch("t2".to_string())
    );

    assert_eq!(
        store.refresh_shared_lock(7, "t2").await.unwrap(),
        SharedLockWrite::Applied("t2".to_string())
    );
    assert_eq!(
        store.delete_shared_lock(7, "t2").await.unwrap(),
        SharedLockWrite::Applied("t2".to_string())
    );
    assert_eq!(
        store.delete_shared_lock(7, "t2").await.unwrap(),
        SharedLockWrite::NotFound
    );
    assert_eq!(
        store.modify_shared_lock(7, "t2", "t3").await.unwrap(),
        SharedLockWrite::NotFound
    );
}

#[tokio::test]
async fn test_shared_lock_cleanup_and_wipe() {
    let store = sqlite_store(StoreOptions {
        shared_lock_timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .await;

    store.create_shared_lock(1, "a").await.unwrap();
    store.create_shared_lock(2, "b").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    store.create_shared_lock(3, "c").await.unwrap();

    assert_eq!(store.get_shared_lock(1).await.unwrap(), None);
    assert_eq!(store.cleanup_shared_locks().await.unwrap(), 2);
    assert_eq!(store.delete_all_shared_locks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_health_check() {
    let store = sqlite_store(StoreOptions::default()).await;
    assert_eq!(store.storage_mode(), StorageMode::ExternalDb);
    store.health_check().await.unwrap();
}
