//! SeaORM entity definitions for the lock tables

pub mod exclusive_lock;
pub mod shared_lock;
pub mod tree_lock;

pub mod prelude {
    pub use super::exclusive_lock::Entity as ExclusiveLockEntity;
    pub use super::shared_lock::Entity as SharedLockEntity;
    pub use super::tree_lock::Entity as TreeLockEntity;
}
