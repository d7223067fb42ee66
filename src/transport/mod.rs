// src/transport/mod.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Capability interface over the remote bucket store. The driver only ever
// talks to the store through `ObjectClient`, so the S3 SDK client and the
// in-memory store are interchangeable.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::TransportResult;

pub mod memory;
pub mod s3;

pub use memory::MemoryClient;
pub use s3::S3Client;

/// Boxed byte stream returned by ranged GETs.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Request headers attached to object creation.
#[derive(Debug, Clone, Default)]
pub struct ObjectOptions {
    pub content_type: Option<String>,
    pub private_acl: bool,
}

/// One page request against the bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub max_keys: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    /// RFC 3339 timestamp as reported by the store
    pub last_modified: String,
    pub etag: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub contents: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Marker to resume from when `is_truncated` is set
    pub next_marker: Option<String>,
}

/// A part that has been uploaded (or copied) into a multipart session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// A part as reported by ListParts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUploadInfo {
    pub key: String,
    pub upload_id: String,
}

/// Inclusive byte range `[first, last]` for UploadPartCopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    pub fn size(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.first, self.last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Head,
}

#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Reads the object starting at `offset`. An offset at or past the end of
    /// a non-empty object fails with `TransportError::InvalidRange`.
    async fn get(&self, key: &str, offset: u64) -> TransportResult<ObjectReader>;

    async fn put(&self, key: &str, body: Bytes, opts: &ObjectOptions) -> TransportResult<()>;

    async fn list(&self, req: &ListRequest) -> TransportResult<ListPage>;

    async fn copy(&self, source_key: &str, dest_key: &str, opts: &ObjectOptions) -> TransportResult<()>;

    /// Bulk delete; per-key failures reported by the store become an error.
    async fn delete_multi(&self, keys: &[String]) -> TransportResult<()>;

    async fn initiate_multipart_upload(&self, key: &str, opts: &ObjectOptions) -> TransportResult<String>;

    /// Uploads one part and returns its entity tag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> TransportResult<String>;

    /// Copies `range` of `source_key` (the whole object when `None`) into a
    /// part and returns its entity tag.
    async fn upload_part_copy(
        &self,
        dest_key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> TransportResult<()>;

    async fn list_parts(&self, key: &str, upload_id: &str) -> TransportResult<Vec<PartInfo>>;

    async fn list_multipart_uploads(&self, prefix: &str) -> TransportResult<Vec<MultipartUploadInfo>>;

    async fn presigned_url(
        &self,
        method: PresignMethod,
        key: &str,
        expires_in: Duration,
    ) -> TransportResult<String>;
}
