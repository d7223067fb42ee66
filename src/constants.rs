// src/constants.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Centralized constants for cosblob to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Driver name reported by `StorageDriver::name`
pub const DRIVER_NAME: &str = "cos";

/// Smallest part the store accepts for any non-final multipart part (1 MiB)
pub const MIN_CHUNK_SIZE: u64 = 1 << 20;

/// Default writer part size (2 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * MIN_CHUNK_SIZE;

/// Maximum keys requested per listing page
pub const LIST_MAX_KEYS: u32 = 1000;

// ============================================================================
// Server-side copy
// ============================================================================

/// Objects at or below this size are moved with a single Copy call (128 MiB)
pub const DEFAULT_MULTIPART_COPY_THRESHOLD: u64 = 128 << 20;

/// Range size of each UploadPartCopy request (128 MiB)
pub const DEFAULT_MULTIPART_COPY_CHUNK_SIZE: u64 = 128 << 20;

/// Maximum in-flight UploadPartCopy requests per copy
pub const DEFAULT_MULTIPART_COPY_MAX_CONCURRENCY: usize = 10;

// ============================================================================
// Requests
// ============================================================================

/// Content type attached to every object the driver creates
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Lifetime of a signed URL when the caller gives no expiry
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(20 * 60);

/// Path delimiter used for listings
pub const PATH_DELIMITER: &str = "/";
