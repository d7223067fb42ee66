// src/paths.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Mapping between logical driver paths ("/a/b") and bucket keys ("root/a/b").

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DriverError, Result};

static PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/[A-Za-z0-9._-]+)+$").expect("path regex is valid")
});

/// Translates logical paths under a fixed root directory.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    root: String,
}

impl PathMapper {
    pub fn new(root_directory: impl Into<String>) -> Self {
        Self { root: root_directory.into() }
    }

    pub fn root_directory(&self) -> &str {
        &self.root
    }

    /// `trim_leading_slashes(trim_trailing_slash(root) + path)`
    pub fn to_key(&self, path: &str) -> String {
        let root = self.root.strip_suffix('/').unwrap_or(&self.root);
        let mut joined = String::with_capacity(root.len() + path.len());
        joined.push_str(root);
        joined.push_str(path);
        joined.trim_start_matches('/').to_string()
    }

    /// Key of the root directory itself.
    pub fn root_key(&self) -> String {
        self.to_key("")
    }

    /// Rewrites a key (or common prefix) back to a rooted logical path.
    pub fn from_key(&self, key: &str) -> String {
        let root_key = self.root_key();
        if root_key.is_empty() {
            return format!("/{}", key);
        }
        let rest = key.strip_prefix(root_key.as_str()).unwrap_or(key);
        if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{}", rest)
        }
    }
}

/// Rejects paths that are not absolute, slash-separated and made of
/// `[A-Za-z0-9._-]` components.
pub fn validate_path(path: &str) -> Result<()> {
    if PATH_REGEX.is_match(path) {
        Ok(())
    } else {
        Err(DriverError::InvalidPath(path.to_string()))
    }
}

/// Like [`validate_path`] but also accepts the root `/`.
pub fn validate_dir_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    validate_path(path)
}
