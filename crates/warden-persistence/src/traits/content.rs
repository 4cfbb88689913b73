//! Content lookup trait
//!
//! The content model lives outside the lock subsystem; shared locks only need
//! to know whether a content item exists and whether it is checked out.

use async_trait::async_trait;

use crate::model::ContentState;

#[async_trait]
pub trait ContentLookup: Send + Sync {
    /// Resolve a content id, `None` when the content does not exist
    async fn content_state(&self, content_id: i32) -> anyhow::Result<Option<ContentState>>;
}
