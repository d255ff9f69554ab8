// =============================================================================
// Matrixon Homeserver Core - Object Store Path Tuples
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   Path: an ordered sequence of filesystem-safe components identifying a single 
//   document, rejecting traversal and any character outside its charset.
//
// Performance Targets:
//   • O(components) validation on construction
//
// Architecture:
//   • Charset restricted to [A-Za-z0-9._-] so components never need filesystem escaping
// =============================================================================

use crate::error::{StoreError, StoreResult};
use std::path::PathBuf;

/// A path tuple: an ordered sequence of components identifying a single
/// document in the store (§4.1). Components may contain only
/// `[A-Za-z0-9._-]`; anything else is rejected so the store never has to
/// escape a component when mapping it onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<String>);

fn is_valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

impl Path {
    /// Build a path tuple from components, rejecting anything that could
    /// traverse outside the store root (`.`, `..` are valid characters in
    /// isolation but a bare `.` or `..` component is rejected explicitly;
    /// the charset otherwise excludes `/`).
    pub fn new<I, S>(components: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = components.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(StoreError::InvalidPath("empty path".into()));
        }
        for part in &parts {
            if part == "." || part == ".." || !is_valid_component(part) {
                return Err(StoreError::InvalidPath(part.clone()));
            }
        }
        Ok(Path(parts))
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// The final component, e.g. the token string or localpart.
    pub fn leaf(&self) -> &str {
        self.0.last().expect("Path is never empty")
    }

    /// Append a child component, yielding a new, deeper path.
    pub fn join(&self, component: impl Into<String>) -> StoreResult<Self> {
        let component = component.into();
        if component == "." || component == ".." || !is_valid_component(&component) {
            return Err(StoreError::InvalidPath(component));
        }
        let mut parts = self.0.clone();
        parts.push(component);
        Ok(Path(parts))
    }

    /// Map onto a filesystem location under `root`: every component but
    /// the last becomes a directory, the last becomes `<leaf>.json`.
    pub(crate) fn to_file(&self, root: &std::path::Path) -> PathBuf {
        let mut buf = root.to_path_buf();
        for part in &self.0[..self.0.len() - 1] {
            buf.push(part);
        }
        buf.push(format!("{}.json", self.leaf()));
        buf
    }

    /// Map onto the directory that would hold this path's children, for
    /// `list()`.
    pub(crate) fn to_dir(&self, root: &std::path::Path) -> PathBuf {
        let mut buf = root.to_path_buf();
        for part in &self.0 {
            buf.push(part);
        }
        buf
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_components() {
        assert!(Path::new(["tokens", "..", "access"]).is_err());
        assert!(Path::new(["."]).is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(Path::new(["tokens", "access/../../etc"]).is_err());
        assert!(Path::new(["has space"]).is_err());
    }

    #[test]
    fn accepts_typical_paths() {
        let p = Path::new(["tokens", "access", "abc123_-."]).unwrap();
        assert_eq!(p.leaf(), "abc123_-.");
        assert_eq!(p.to_string(), "tokens/access/abc123_-.");
    }

    #[test]
    fn join_extends_a_path() {
        let p = Path::new(["users"]).unwrap().join("alice").unwrap();
        assert_eq!(p.to_string(), "users/alice");
    }
}
