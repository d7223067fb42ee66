// src/object_store.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// The path-addressed storage contract the driver implements, the writer
// handle it returns, and a generic walk built on list + stat.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::presign::UrlOptions;

/// Metadata for a file or (synthetic) directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn directory(path: impl Into<String>) -> Self {
        Self { path: path.into(), size: 0, mod_time: None, is_dir: true }
    }
}

/// What a walk visitor wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into the directory just visited.
    SkipDir,
}

/// Streaming writer handle returned by [`StorageDriver::writer`].
///
/// Lifecycle: any number of `write` calls followed by exactly one of
/// `close`, `commit` or `cancel`. After that every call fails.
#[async_trait]
pub trait FileWriter: Send {
    /// Accepts all of `p`, returning its length.
    async fn write(&mut self, p: &[u8]) -> Result<usize>;

    /// Bytes written so far, including bytes of a resumed upload.
    fn size(&self) -> u64;

    /// Flushes buffered bytes but leaves the upload resumable.
    async fn close(&mut self) -> Result<()>;

    /// Makes the written content visible at the target path.
    async fn commit(&mut self) -> Result<()>;

    /// Discards everything written.
    async fn cancel(&mut self) -> Result<()>;
}

/// Path-addressed blob storage. Paths are absolute, `/`-separated.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_content(&self, path: &str) -> Result<Bytes>;

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()>;

    /// Stream of the object's bytes starting at `offset`.
    async fn reader(&self, path: &str, offset: u64) -> Result<Box<dyn AsyncRead + Send + Unpin>>;

    /// New writer for `path`; with `append` resumes the in-flight upload.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>>;

    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Direct children of `path` (files, then directories).
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    async fn move_object(&self, source_path: &str, dest_path: &str) -> Result<()>;

    /// Deletes `path` and everything below it.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn url_for(&self, path: &str, options: &UrlOptions) -> Result<String>;

    /// Depth-first traversal below `path`, children in lexical order.
    ///
    /// Entries that disappear between list and stat are skipped. The first
    /// error returned by `visit` aborts the walk.
    async fn walk(
        &self,
        path: &str,
        visit: &mut (dyn for<'f> FnMut(&'f FileInfo) -> Result<WalkControl> + Send),
    ) -> Result<()> {
        let mut children = self.list(path).await?;
        children.sort();
        let mut stack = vec![children.into_iter()];

        while let Some(level) = stack.last_mut() {
            let Some(child) = level.next() else {
                stack.pop();
                continue;
            };

            let info = match self.stat(&child).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            if visit(&info)? == WalkControl::SkipDir || !info.is_dir {
                continue;
            }

            match self.list(&child).await {
                Ok(mut next) => {
                    next.sort();
                    stack.push(next.into_iter());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
