//! In-process persistence backend
//!
//! Keeps the three lock tables in process memory. Atomicity comes from the
//! per-key entry locks of `DashMap` for leases and shared locks, and from a
//! single mutex around the path-lock table, whose check-and-insert has to see
//! every path at once.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use warden_common::utils::{normalize_path, paths_conflict};

use crate::model::*;
use crate::traits::*;

/// A lease row
#[derive(Clone, Debug)]
struct LeaseEntry {
    operation_id: String,
    expiration: DateTime<Utc>,
}

/// A shared lock row
#[derive(Clone, Debug)]
struct SharedLockEntry {
    token: String,
    creation_date: DateTime<Utc>,
}

#[derive(Default)]
struct TreeLockTable {
    last_id: i32,
    entries: BTreeMap<i32, TreeLockEntry>,
}

/// In-process lock store
pub struct MemoryLockStore {
    leases: DashMap<String, LeaseEntry>,
    tree_locks: Mutex<TreeLockTable>,
    shared_locks: DashMap<i32, SharedLockEntry>,
    options: StoreOptions,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl MemoryLockStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            leases: DashMap::new(),
            tree_locks: Mutex::new(TreeLockTable::default()),
            shared_locks: DashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }
}

// ============================================================================
// ExclusiveLockPersistence implementation
// ============================================================================

#[async_trait]
impl ExclusiveLockPersistence for MemoryLockStore {
    async fn acquire_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let lease = LeaseEntry {
            operation_id: operation_id.to_string(),
            expiration,
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expiration > Utc::now() {
                    return Ok(false);
                }
                entry.insert(lease);
            }
            Entry::Vacant(entry) => {
                entry.insert(lease);
            }
        }
        Ok(true)
    }

    async fn refresh_exclusive_lock(
        &self,
        key: &str,
        operation_id: &str,
        expiration: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Some(mut lease) = self.leases.get_mut(key)
            && lease.operation_id == operation_id
            && lease.expiration > Utc::now()
        {
            lease.expiration = expiration;
        }
        Ok(())
    }

    async fn release_exclusive_lock(&self, key: &str, operation_id: &str) -> anyhow::Result<()> {
        self.leases
            .remove_if(key, |_, lease| lease.operation_id == operation_id);
        Ok(())
    }

    async fn is_exclusive_locked(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self
            .leases
            .get(key)
            .is_some_and(|lease| lease.expiration > Utc::now()))
    }
}

// ============================================================================
// TreeLockPersistence implementation
// ============================================================================

impl TreeLockTable {
    fn purge_stale(&mut self, time_limit: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.locked_at > time_limit);
    }

    fn has_conflict(&self, path: &str) -> bool {
        self.entries
            .values()
            .any(|entry| paths_conflict(&entry.path, path))
    }
}

#[async_trait]
impl TreeLockPersistence for MemoryLockStore {
    async fn acquire_tree_lock(&self, path: &str) -> anyhow::Result<i32> {
        let path = normalize_path(path);
        let mut table = self.tree_locks.lock();
        table.purge_stale(self.options.tree_lock_time_limit());

        if table.has_conflict(&path) {
            return Ok(0);
        }

        table.last_id += 1;
        let id = table.last_id;
        table.entries.insert(
            id,
            TreeLockEntry {
                id,
                path,
                locked_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn release_tree_locks(&self, lock_ids: &[i32]) -> anyhow::Result<()> {
        let mut table = self.tree_locks.lock();
        for id in lock_ids {
            table.entries.remove(id);
        }
        Ok(())
    }

    async fn is_tree_locked(&self, path: &str) -> anyhow::Result<bool> {
        let path = normalize_path(path);
        let mut table = self.tree_locks.lock();
        table.purge_stale(self.options.tree_lock_time_limit());
        Ok(table.has_conflict(&path))
    }

    async fn load_all_tree_locks(&self) -> anyhow::Result<Vec<TreeLockEntry>> {
        let mut table = self.tree_locks.lock();
        table.purge_stale(self.options.tree_lock_time_limit());
        Ok(table.entries.values().cloned().collect())
    }
}

// ============================================================================
// SharedLockPersistence implementation
// ============================================================================

#[async_trait]
impl SharedLockPersistence for MemoryLockStore {
    async fn create_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let time_limit = self.options.shared_lock_time_limit();
        let fresh = SharedLockEntry {
            token: lock.to_string(),
            creation_date: Utc::now(),
        };

        match self.shared_locks.entry(content_id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.creation_date <= time_limit {
                    *existing = fresh;
                } else if existing.token == lock {
                    existing.creation_date = fresh.creation_date;
                } else {
                    return Ok(SharedLockWrite::Mismatch(existing.token.clone()));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }
        Ok(SharedLockWrite::Applied(lock.to_string()))
    }

    async fn refresh_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let time_limit = self.options.shared_lock_time_limit();
        let Some(mut existing) = self.shared_locks.get_mut(&content_id) else {
            return Ok(SharedLockWrite::NotFound);
        };
        if existing.creation_date <= time_limit {
            return Ok(SharedLockWrite::NotFound);
        }
        if existing.token != lock {
            return Ok(SharedLockWrite::Mismatch(existing.token.clone()));
        }
        existing.creation_date = Utc::now();
        Ok(SharedLockWrite::Applied(lock.to_string()))
    }

    async fn modify_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
        new_lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let time_limit = self.options.shared_lock_time_limit();
        let Some(mut existing) = self.shared_locks.get_mut(&content_id) else {
            return Ok(SharedLockWrite::NotFound);
        };
        if existing.creation_date <= time_limit {
            return Ok(SharedLockWrite::NotFound);
        }
        if existing.token != lock {
            return Ok(SharedLockWrite::Mismatch(existing.token.clone()));
        }
        existing.token = new_lock.to_string();
        existing.creation_date = Utc::now();
        Ok(SharedLockWrite::Applied(new_lock.to_string()))
    }

    async fn get_shared_lock(&self, content_id: i32) -> anyhow::Result<Option<String>> {
        let time_limit = self.options.shared_lock_time_limit();
        Ok(self
            .shared_locks
            .get(&content_id)
            .filter(|existing| existing.creation_date > time_limit)
            .map(|existing| existing.token.clone()))
    }

    async fn delete_shared_lock(
        &self,
        content_id: i32,
        lock: &str,
    ) -> anyhow::Result<SharedLockWrite> {
        let time_limit = self.options.shared_lock_time_limit();
        let Entry::Occupied(entry) = self.shared_locks.entry(content_id) else {
            return Ok(SharedLockWrite::NotFound);
        };
        if entry.get().creation_date <= time_limit {
            entry.remove();
            return Ok(SharedLockWrite::NotFound);
        }
        if entry.get().token != lock {
            return Ok(SharedLockWrite::Mismatch(entry.get().token.clone()));
        }
        let removed = entry.remove();
        Ok(SharedLockWrite::Applied(removed.token))
    }

    async fn delete_all_shared_locks(&self) -> anyhow::Result<u64> {
        let count = self.shared_locks.len() as u64;
        self.shared_locks.clear();
        Ok(count)
    }

    async fn cleanup_shared_locks(&self) -> anyhow::Result<u64> {
        let time_limit = self.options.shared_lock_time_limit();
        let before = self.shared_locks.len();
        self.shared_locks
            .retain(|_, existing| existing.creation_date > time_limit);
        Ok(before.saturating_sub(self.shared_locks.len()) as u64)
    }
}

#[async_trait]
impl LockPersistence for MemoryLockStore {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Memory
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ============================================================================
// ContentLookup implementation
// ============================================================================

/// In-process content table used where no repository is attached
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    contents: Arc<DashMap<i32, ContentState>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing, checked-in content item
    pub fn insert(&self, content_id: i32) {
        self.contents.insert(
            content_id,
            ContentState {
                content_id,
                checked_out_by: None,
            },
        );
    }

    pub fn remove(&self, content_id: i32) {
        self.contents.remove(&content_id);
    }

    /// Mark the content as checked out by `user_id`
    pub fn check_out(&self, content_id: i32, user_id: i32) -> bool {
        match self.contents.get_mut(&content_id) {
            Some(mut state) => {
                state.checked_out_by = Some(user_id);
                true
            }
            None => false,
        }
    }

    pub fn check_in(&self, content_id: i32) -> bool {
        match self.contents.get_mut(&content_id) {
            Some(mut state) => {
                state.checked_out_by = None;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ContentLookup for MemoryContentStore {
    async fn content_state(&self, content_id: i32) -> anyhow::Result<Option<ContentState>> {
        Ok(self.contents.get(&content_id).map(|state| state.clone()))
    }
}
