//! Static mount points (§3 "Mount point", §4.3 "Static mount points").

use crate::error::RouteError;
use http::HeaderMap;
use std::path::PathBuf;

pub struct Mount {
    pub prefix: String,
    pub base_dir: PathBuf,
    pub headers: HeaderMap,
}

/// Mounts kept sorted by descending prefix length so the longest match
/// wins (§3 invariant).
#[derive(Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    pub fn new() -> Self {
        Self { mounts: Vec::new() }
    }

    pub fn insert(&mut self, prefix: &str, base_dir: impl Into<PathBuf>, headers: HeaderMap) -> Result<(), RouteError> {
        if !prefix.starts_with('/') {
            return Err(RouteError::InvalidMountPrefix(prefix.to_string()));
        }
        self.mounts.push(Mount {
            prefix: prefix.to_string(),
            base_dir: base_dir.into(),
            headers,
        });
        self.mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(())
    }

    pub fn remove(&mut self, prefix: &str) -> bool {
        let before = self.mounts.len();
        self.mounts.retain(|m| m.prefix != prefix);
        self.mounts.len() != before
    }

    /// Walks mounts longest-prefix-first; returns the matching mount and the
    /// safety-checked path relative to its `base_dir`.
    pub fn find(&self, decoded_path: &str) -> Option<(&Mount, String)> {
        for mount in &self.mounts {
            let Some(rest) = decoded_path.strip_prefix(mount.prefix.as_str()) else {
                continue;
            };
            // Require a path boundary right after the prefix so `/static`
            // doesn't match `/staticfoo`.
            if !(rest.is_empty() || rest.starts_with('/')) {
                continue;
            }
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            if !is_safe_relative_path(rest) {
                continue;
            }
            return Some((mount, rest.to_string()));
        }
        None
    }
}

/// Rejects paths that escape the mount root via `..`, or embed a NUL byte
/// or backslash — mirrors `detail::is_valid_path` in the original source.
pub fn is_safe_relative_path(path: &str) -> bool {
    let mut depth: i64 = 0;
    for component in path.split('/') {
        if component.is_empty() || component == "." {
            continue;
        }
        if component.contains('\0') || component.contains('\\') {
            return false;
        }
        if component == ".." {
            if depth == 0 {
                return false;
            }
            depth -= 1;
        } else {
            depth += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut table = MountTable::new();
        table.insert("/static", "/a", HeaderMap::new()).unwrap();
        table.insert("/static/images", "/b", HeaderMap::new()).unwrap();
        let (mount, rest) = table.find("/static/images/cat.png").unwrap();
        assert_eq!(mount.prefix, "/static/images");
        assert_eq!(rest, "cat.png");
    }

    #[test]
    fn rejects_escaping_path() {
        assert!(!is_safe_relative_path("../secret"));
        assert!(!is_safe_relative_path("a/../../secret"));
        assert!(is_safe_relative_path("a/../b"));
        assert!(!is_safe_relative_path("a\\b"));
        assert!(!is_safe_relative_path("a\0b"));
    }

    #[test]
    fn prefix_must_start_with_slash() {
        let mut table = MountTable::new();
        assert!(table.insert("static", "/a", HeaderMap::new()).is_err());
    }

    #[test]
    fn prefix_requires_path_boundary() {
        let mut table = MountTable::new();
        table.insert("/static", "/a", HeaderMap::new()).unwrap();
        assert!(table.find("/staticfoo").is_none());
        let (mount, rest) = table.find("/static/foo").unwrap();
        assert_eq!(mount.prefix, "/static");
        assert_eq!(rest, "foo");
        let (mount, rest) = table.find("/static").unwrap();
        assert_eq!(mount.prefix, "/static");
        assert_eq!(rest, "");
    }
}
