// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace path confinement.
//!
//! Every client-supplied path funnels through [`PathGuard::resolve`]: the
//! path is lexically cleaned, joined under the workspace root, and then
//! re-verified after symlink resolution. Anything that lands outside the
//! root is rejected as path traversal.

use crate::error::ApiError;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// `root` must already be canonicalized (the config layer does this).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path under the workspace root.
    ///
    /// Relative paths are joined to the root; absolute paths must already
    /// point inside it. `..` components are resolved lexically and may not
    /// climb above the root. For paths whose target does not exist yet
    /// (writes), the deepest existing ancestor is canonicalized so a
    /// symlink cannot smuggle the operation outside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ApiError> {
        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            clean(requested)
        } else {
            clean(&self.root.join(requested))
        };

        if !joined.starts_with(&self.root) {
            return Err(ApiError::PathTraversal(path.to_string()));
        }

        let resolved = resolve_symlinks(&joined)
            .map_err(|e| ApiError::from_io(&format!("resolve {}", path), e))?;
        if !resolved.starts_with(&self.root) {
            return Err(ApiError::PathTraversal(path.to_string()));
        }
        Ok(resolved)
    }

    /// Render an absolute path relative to the root, `/`-separated, for
    /// returning to clients. The root itself renders as `.`.
    pub fn relativize(&self, abs: &Path) -> String {
        match abs.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => abs.to_string_lossy().into_owned(),
        }
    }
}

/// Lexical clean: drop `.`, apply `..` without touching the filesystem.
/// A `..` that would climb above the first component is preserved so the
/// containment check fails loudly instead of silently clamping.
fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                match parts.last() {
                    Some(Component::Normal(_)) => {
                        parts.pop();
                    }
                    Some(Component::RootDir) => {} // `/..` is `/`
                    _ => parts.push(comp),
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Canonicalize the deepest existing ancestor and re-attach the trailing,
/// not-yet-existing components.
fn resolve_symlinks(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        if existing.symlink_metadata().is_ok() {
            break;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
