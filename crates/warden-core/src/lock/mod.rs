//! Lock primitives
//!
//! This module provides:
//! - Lease-based exclusive locks with heartbeat renewal
//! - Lock-guarded execution blocks
//! - All-or-nothing tree locks over repository paths
//! - Token-verified shared locks on content items

mod block;
mod context;
mod exclusive;
mod renewer;
mod shared;
mod tree;

pub use block::{ExclusiveBlock, ExclusiveBlockType};
pub use context::ExclusiveLockContext;
pub use exclusive::ExclusiveLock;
pub use shared::SharedLock;
pub use tree::{TreeLock, TreeLocker};
