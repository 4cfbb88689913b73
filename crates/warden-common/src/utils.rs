//! Utility functions shared by the lock primitives and the stores

/// Generate a random operation identifier
pub fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Normalize a repository path for lock comparison.
///
/// Paths are compared case-insensitively and without trailing separators, so
/// `/Root/Content/` and `/root/content` name the same node.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// All ancestors of a normalized path, nearest last, excluding the path itself.
///
/// `/root/a/b` yields `["/root", "/root/a"]`.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut result = Vec::new();
    for (idx, ch) in path.char_indices() {
        if ch == '/' && idx > 0 {
            result.push(path[..idx].to_string());
        }
    }
    result
}

/// Whether `path` lies in the subtree rooted at `root` (both normalized).
pub fn is_in_tree(root: &str, path: &str) -> bool {
    if root == "/" {
        return true;
    }
    path == root
        || (path.len() > root.len()
            && path.starts_with(root)
            && path.as_bytes()[root.len()] == b'/')
}

/// Whether a lock on `a` and a lock on `b` conflict (both normalized).
///
/// A path conflicts with itself, its ancestors and its descendants.
pub fn paths_conflict(a: &str, b: &str) -> bool {
    is_in_tree(a, b) || is_in_tree(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/Root/Content/"), "/root/content");
        assert_eq!(normalize_path("  /Root "), "/root");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_ancestor_paths() {
        assert_eq!(ancestor_paths("/root/a/b"), vec!["/root", "/root/a"]);
        assert!(ancestor_paths("/root").is_empty());
    }

    #[test]
    fn test_is_in_tree() {
        assert!(is_in_tree("/root/a", "/root/a"));
        assert!(is_in_tree("/root/a", "/root/a/b/c"));
        assert!(!is_in_tree("/root/a", "/root/ab"));
        assert!(!is_in_tree("/root/a/b", "/root/a"));
        assert!(is_in_tree("/", "/root"));
    }

    #[test]
    fn test_paths_conflict() {
        assert!(paths_conflict("/root/a", "/root/a/b"));
        assert!(paths_conflict("/root/a/b", "/root/a"));
        assert!(!paths_conflict("/root/a", "/root/b"));
        assert!(!paths_conflict("/root/a", "/root/ab"));
    }

    #[test]
    fn test_new_operation_id_is_unique() {
        assert_ne!(new_operation_id(), new_operation_id());
    }
}
