// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File engine: workspace-confined filesystem operations.
//!
//! All operations resolve their paths through the [`PathGuard`]. Content
//! search (`find`) and any bulk read share one counting semaphore sized to
//! `MAX_CONCURRENT_READS` so a single request cannot monopolize disk I/O.

use crate::error::ApiError;
use crate::guard::PathGuard;
use crate::protocol::{FileEntry, ReplaceResult, WritePayload};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Bytes of a file inspected for UTF-8 validity before content search.
const UTF8_SNIFF_LEN: usize = 8 * 1024;

pub struct FileEngine {
    guard: PathGuard,
    max_file_size: u64,
    limiter: Arc<Semaphore>,
}

impl FileEngine {
    pub fn new(guard: PathGuard, max_file_size: u64, limiter: Arc<Semaphore>) -> Self {
        Self { guard, max_file_size, limiter }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Write `bytes` to `path`, creating parent directories as needed.
    /// Shared by the JSON, raw-binary, and multipart wire modes.
    pub async fn write(
        &self,
        path: &str,
        bytes: &[u8],
        mode: Option<u32>,
    ) -> Result<WritePayload, ApiError> {
        if bytes.len() as u64 > self.max_file_size {
            return Err(ApiError::TooLarge(format!(
                "file exceeds maximum size ({} > {} bytes)",
                bytes.len(),
                self.max_file_size
            )));
        }
        let abs = self.guard.resolve(path)?;
        if abs.is_dir() {
            return Err(ApiError::Conflict(format!("{}: path exists as a directory", path)));
        }
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::from_io(&format!("create parents for {}", path), e))?;
        }
        tokio::fs::write(&abs, bytes)
            .await
            .map_err(|e| ApiError::from_io(&format!("write {}", path), e))?;
        if let Some(mode) = mode {
            tokio::fs::set_permissions(&abs, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| ApiError::from_io(&format!("chmod {}", path), e))?;
        }
        debug!(path, size = bytes.len(), "file written");
        Ok(WritePayload { path: self.guard.relativize(&abs), size: bytes.len() as u64 })
    }

    /// Read the full file contents plus its detected MIME type.
    pub async fn read(&self, path: &str) -> Result<(Vec<u8>, String), ApiError> {
        let abs = self.guard.resolve(path)?;
        if abs.is_dir() {
            return Err(ApiError::Validation(format!("{}: path is a directory", path)));
        }
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| ApiError::from_io(&format!("read {}", path), e))?;
        Ok((bytes, detect_mime(&abs)))
    }

    /// Open a file for streaming; returns the handle, its size, and MIME.
    pub async fn open_stream(&self, path: &str) -> Result<(tokio::fs::File, u64, String), ApiError> {
        let abs = self.guard.resolve(path)?;
        if abs.is_dir() {
            return Err(ApiError::Validation(format!("{}: path is a directory", path)));
        }
        let file = tokio::fs::File::open(&abs)
            .await
            .map_err(|e| ApiError::from_io(&format!("open {}", path), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ApiError::from_io(&format!("stat {}", path), e))?
            .len();
        Ok((file, size, detect_mime(&abs)))
    }

    /// List a directory (or return the single entry for a file).
    /// Entries are sorted lexicographically; hidden entries are excluded
    /// unless requested.
    pub async fn list(
        &self,
        path: &str,
        recursive: bool,
        include_hidden: bool,
    ) -> Result<Vec<FileEntry>, ApiError> {
        let abs = self.guard.resolve(path)?;
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| ApiError::from_io(&format!("stat {}", path), e))?;
        if !meta.is_dir() {
            return Ok(vec![self.entry(&abs, &meta)]);
        }
        let mut out = Vec::new();
        self.walk_entries(&abs, recursive, include_hidden, &mut out).await?;
        Ok(out)
    }

    fn walk_entries<'a>(
        &'a self,
        dir: &'a Path,
        recursive: bool,
        include_hidden: bool,
        out: &'a mut Vec<FileEntry>,
    ) -> futures_util::future::BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            for child in sorted_children(dir, include_hidden).await? {
                let meta = match tokio::fs::metadata(&child).await {
                    Ok(m) => m,
                    // Raced deletion or dangling symlink: skip, don't fail the listing
                    Err(_) => continue,
                };
                out.push(self.entry(&child, &meta));
                if recursive && meta.is_dir() {
                    self.walk_entries(&child, recursive, include_hidden, out).await?;
                }
            }
            Ok(())
        })
    }

    fn entry(&self, abs: &Path, meta: &std::fs::Metadata) -> FileEntry {
        FileEntry {
            path: self.guard.relativize(abs),
            is_dir: meta.is_dir(),
            size: meta.len(),
            mode: format!("{:o}", meta.permissions().mode() & 0o7777),
            modified_at: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    /// Delete a file or directory. A non-empty directory requires
    /// `recursive`, otherwise the request conflicts.
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        let abs = self.guard.resolve(path)?;
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| ApiError::from_io(&format!("stat {}", path), e))?;
        let result = if !meta.is_dir() {
            tokio::fs::remove_file(&abs).await
        } else if recursive {
            tokio::fs::remove_dir_all(&abs).await
        } else {
            tokio::fs::remove_dir(&abs).await
        };
        result.map_err(|e| {
            if is_errno(&e, nix::errno::Errno::ENOTEMPTY) {
                ApiError::Conflict(format!("{}: directory not empty", path))
            } else {
                ApiError::from_io(&format!("delete {}", path), e)
            }
        })
    }

    /// Move an entry. Refuses an existing destination unless `overwrite`;
    /// falls back to copy+unlink across devices.
    pub async fn move_entry(
        &self,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> Result<(), ApiError> {
        let src = self.guard.resolve(source)?;
        let dst = self.guard.resolve(destination)?;
        if tokio::fs::metadata(&src).await.is_err() {
            return Err(ApiError::NotFound(format!("{}: not found", source)));
        }
        if tokio::fs::metadata(&dst).await.is_ok() {
            if !overwrite {
                return Err(ApiError::Conflict(format!("{}: destination exists", destination)));
            }
            self.delete(destination, true).await?;
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::from_io(&format!("create parents for {}", destination), e))?;
        }
        rename_or_copy(&src, &dst)
            .await
            .map_err(|e| ApiError::from_io(&format!("move {} -> {}", source, destination), e))
    }

    /// Rename an entry; an existing target is always a conflict.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), ApiError> {
        let old = self.guard.resolve(old_path)?;
        let new = self.guard.resolve(new_path)?;
        if tokio::fs::metadata(&old).await.is_err() {
            return Err(ApiError::NotFound(format!("{}: not found", old_path)));
        }
        if tokio::fs::metadata(&new).await.is_ok() {
            return Err(ApiError::Conflict(format!("{}: target exists", new_path)));
        }
        rename_or_copy(&old, &new)
            .await
            .map_err(|e| ApiError::from_io(&format!("rename {} -> {}", old_path, new_path), e))
    }

    /// Case-insensitive substring match over base names under `dir`.
    pub async fn search(&self, dir: &str, pattern: &str) -> Result<Vec<String>, ApiError> {
        if pattern.is_empty() {
            return Err(ApiError::Validation("pattern must not be empty".to_string()));
        }
        let root = self.guard.resolve(dir)?;
        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            for child in sorted_children(&current, true).await? {
                if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                    if name.to_lowercase().contains(&needle) {
                        matches.push(self.guard.relativize(&child));
                    }
                }
                if child.is_dir() {
                    pending.push(child);
                }
            }
        }
        Ok(matches)
    }

    /// Content search: read candidate files concurrently under the shared
    /// limiter, skip binaries (first 8 KiB fails UTF-8), return matching
    /// paths. Results are unordered.
    pub async fn find(
        &self,
        dir: &str,
        keyword: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<String>, ApiError> {
        if keyword.is_empty() {
            return Err(ApiError::Validation("keyword must not be empty".to_string()));
        }
        let root = self.guard.resolve(dir)?;
        let cap = max_results.unwrap_or(usize::MAX).max(1);

        let mut files = Vec::new();
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            for child in sorted_children(&current, true).await? {
                if child.is_dir() {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }

        let mut set: JoinSet<Option<PathBuf>> = JoinSet::new();
        for abs in files {
            let keyword = keyword.to_string();
            let limiter = Arc::clone(&self.limiter);
            set.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok()?;
                match tokio::fs::read(&abs).await {
                    Ok(bytes) if contains_keyword(&bytes, &keyword) => Some(abs),
                    _ => None,
                }
            });
        }

        let mut matches = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(abs)) = joined {
                matches.push(self.guard.relativize(&abs));
                if matches.len() >= cap {
                    set.abort_all();
                    break;
                }
            }
        }
        Ok(matches)
    }

    /// Literal replace-all across `files`. Each file is rewritten atomically
    /// (temp file in the same directory, then rename). Non-UTF-8 files get a
    /// per-file error; the rest proceed.
    pub async fn replace(
        &self,
        files: &[String],
        from: &str,
        to: &str,
    ) -> Result<Vec<ReplaceResult>, ApiError> {
        if from.is_empty() {
            return Err(ApiError::Validation("from must not be empty".to_string()));
        }
        let mut results = Vec::with_capacity(files.len());
        for path in files {
            let result = match self.replace_one(path, from, to).await {
                Ok(count) => ReplaceResult {
                    path: path.clone(),
                    ok: true,
                    replacements: Some(count),
                    error: None,
                },
                Err(e) => ReplaceResult {
                    path: path.clone(),
                    ok: false,
                    replacements: None,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn replace_one(&self, path: &str, from: &str, to: &str) -> Result<usize, ApiError> {
        let abs = self.guard.resolve(path)?;
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| ApiError::from_io(&format!("read {}", path), e))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ApiError::Validation(format!("{}: not valid UTF-8", path)))?;
        let count = text.matches(from).count();
        if count == 0 {
            return Ok(0);
        }
        let replaced = text.replace(from, to);
        let target = abs.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, replaced.as_bytes()))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::from_io(&format!("rewrite {}", path), e))?;
        Ok(count)
    }
}

/// Children of `dir`, lexicographically sorted, optionally skipping
/// dot-prefixed names.
async fn sorted_children(dir: &Path, include_hidden: bool) -> Result<Vec<PathBuf>, ApiError> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ApiError::from_io(&format!("read dir {}", dir.display()), e))?;
    let mut children = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| ApiError::from_io(&format!("read dir {}", dir.display()), e))?
    {
        let name = entry.file_name();
        if !include_hidden && name.to_string_lossy().starts_with('.') {
            continue;
        }
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

/// Rename, falling back to copy+unlink when the kernel reports a
/// cross-device link. A failed copy removes the partial destination and
/// leaves the source intact.
async fn rename_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_errno(&e, nix::errno::Errno::EXDEV) => {
            if let Err(copy_err) = copy_recursive(src, dst).await {
                let _ = remove_any(dst).await;
                return Err(copy_err);
            }
            remove_any(src).await
        }
        Err(e) => Err(e),
    }
}

fn copy_recursive<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> futures_util::future::BoxFuture<'a, std::io::Result<()>> {
    Box::pin(async move {
        let meta = tokio::fs::metadata(src).await?;
        if meta.is_dir() {
            tokio::fs::create_dir_all(dst).await?;
            let mut reader = tokio::fs::read_dir(src).await?;
            while let Some(entry) = reader.next_entry().await? {
                copy_recursive(&entry.path(), &dst.join(entry.file_name())).await?;
            }
        } else {
            tokio::fs::copy(src, dst).await?;
        }
        Ok(())
    })
}

async fn remove_any(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => Ok(()),
    }
}

fn is_errno(err: &std::io::Error, errno: nix::errno::Errno) -> bool {
    err.raw_os_error() == Some(errno as i32)
}

/// UTF-8 sniff on the first 8 KiB, then a literal substring check. A
/// multi-byte character cut by the sniff window does not count as binary.
fn contains_keyword(bytes: &[u8], keyword: &str) -> bool {
    let sniff = &bytes[..bytes.len().min(UTF8_SNIFF_LEN)];
    match std::str::from_utf8(sniff) {
        Ok(_) => {}
        Err(e) => {
            let truncated_char = bytes.len() > UTF8_SNIFF_LEN && e.error_len().is_none();
            if !truncated_char {
                return false;
            }
        }
    }
    String::from_utf8_lossy(bytes).contains(keyword)
}

/// Write via a temp file in the target's directory plus rename, preserving
/// the original permission bits.
fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    let perms = std::fs::metadata(target)?.permissions();
    tmp.as_file().set_permissions(perms)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn detect_mime(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string()
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
