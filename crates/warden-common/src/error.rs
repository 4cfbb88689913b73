//! Error types for Warden
//!
//! `LockError` is the single error taxonomy surfaced by every lock primitive.
//! Persistence backends report failures as `anyhow::Error`; those are wrapped
//! into `LockError::StoreUnavailable` at the coordination layer and are never
//! swallowed on the request path.

use std::time::Duration;

/// Lock subsystem error types
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("lock '{key}' is held by another operation")]
    Conflict { key: String },

    #[error("timed out after {waited:?} waiting for lock '{key}'")]
    Timeout { key: String, waited: Duration },

    #[error("lock operation cancelled")]
    Cancelled,

    #[error("tree is locked: {path}")]
    TreeLocked { path: String },

    #[error("content #{0} not found")]
    ContentNotFound(i32),

    #[error("content #{0} is checked out")]
    ContentLocked(i32),

    #[error("shared lock of content #{0} not found")]
    SharedLockNotFound(i32),

    #[error("content #{content_id} is locked by another shared lock")]
    OwnershipMismatch { content_id: i32, current: String },

    #[error("invalid lock context: {0}")]
    InvalidContext(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("lock store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}

impl LockError {
    /// Whether the error means "someone else holds it right now".
    ///
    /// Conflicts drive the polling loops; every other kind ends the attempt.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LockError::Conflict { .. }
                | LockError::TreeLocked { .. }
                | LockError::OwnershipMismatch { .. }
        )
    }

    /// Current shared-lock token carried by an ownership mismatch.
    pub fn current_token(&self) -> Option<&str> {
        match self {
            LockError::OwnershipMismatch { current, .. } => Some(current),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_conversion() {
        let err: LockError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, LockError::StoreUnavailable(_)));
        assert_eq!(err.to_string(), "lock store unavailable: connection refused");
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_kinds() {
        assert!(
            LockError::TreeLocked {
                path: "/root/a".to_string()
            }
            .is_conflict()
        );
        assert!(!LockError::Cancelled.is_conflict());
        assert!(
            !LockError::Timeout {
                key: "k".to_string(),
                waited: Duration::from_secs(1)
            }
            .is_conflict()
        );
    }

    #[test]
    fn test_current_token() {
        let err = LockError::OwnershipMismatch {
            content_id: 7,
            current: "t1".to_string(),
        };
        assert_eq!(err.current_token(), Some("t1"));
        assert_eq!(
            err.to_string(),
            "content #7 is locked by another shared lock"
        );
        assert_eq!(LockError::SharedLockNotFound(7).current_token(), None);
    }
}
