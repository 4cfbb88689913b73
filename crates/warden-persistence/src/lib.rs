//! Warden Persistence - Lock store contract and backends
//!
//! This crate provides:
//! - Persistence traits the lock primitives are written against
//! - SeaORM entity definitions for the lock tables
//! - An in-process backend and an external database backend

pub mod entity;
pub mod memory;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export persistence traits
pub use traits::{
    ContentLookup, ExclusiveLockPersistence, LockPersistence, SharedLockPersistence,
    TreeLockPersistence,
};

// Re-export backends
pub use memory::{MemoryContentStore, MemoryLockStore};
pub use sql::SqlLockStore;

// Re-export model types
pub use model::{ContentState, SharedLockWrite, StorageMode, StoreOptions, TreeLockEntry};
