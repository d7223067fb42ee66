// src/copy.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Server-side object copy. Small objects go through a single Copy call;
// large ones are split into byte ranges copied concurrently as parts of a
// multipart upload at the destination.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::constants::{
    DEFAULT_MULTIPART_COPY_CHUNK_SIZE, DEFAULT_MULTIPART_COPY_MAX_CONCURRENCY,
    DEFAULT_MULTIPART_COPY_THRESHOLD, MIN_CHUNK_SIZE,
};
use crate::error::{DriverError, Result};
use crate::metadata;
use crate::multipart::object_options;
use crate::paths::PathMapper;
use crate::transport::{ByteRange, CompletedPart, ObjectClient};

/// Tuning for server-side copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyConfig {
    /// Objects up to and including this size use a single Copy (default: 128 MiB)
    pub threshold: u64,
    /// Size of each copied range (default: 128 MiB)
    pub chunk_size: u64,
    /// Maximum UploadPartCopy requests in flight (default: 10)
    pub max_concurrency: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MULTIPART_COPY_THRESHOLD,
            chunk_size: DEFAULT_MULTIPART_COPY_CHUNK_SIZE,
            max_concurrency: DEFAULT_MULTIPART_COPY_MAX_CONCURRENCY,
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(DriverError::InvalidParameter(format!(
                "multipart copy chunk size {} is below the minimum part size {}",
                self.chunk_size, MIN_CHUNK_SIZE
            )));
        }
        if self.max_concurrency == 0 {
            return Err(DriverError::InvalidParameter(
                "multipart copy concurrency must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Splits `[0, size)` into inclusive ranges of at most `chunk_size` bytes.
pub fn part_ranges(size: u64, chunk_size: u64) -> Vec<ByteRange> {
    let mut ranges = Vec::new();
    let mut first = 0u64;
    while first < size {
        let last = (first + chunk_size).min(size) - 1;
        ranges.push(ByteRange { first, last });
        first = last + 1;
    }
    ranges
}

pub struct CopyEngine {
    client: Arc<dyn ObjectClient>,
    config: CopyConfig,
}

impl CopyEngine {
    pub fn new(client: Arc<dyn ObjectClient>, config: CopyConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Copies `source_path` to `dest_path` without moving bytes through the
    /// client. Cancelling `cancel` stops outstanding part copies and aborts
    /// the destination upload.
    pub async fn copy(
        &self,
        paths: &PathMapper,
        source_path: &str,
        dest_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        let info = metadata::stat(self.client.as_ref(), paths, source_path).await?;
        if info.is_dir {
            return Err(DriverError::not_found(source_path));
        }

        let source_key = paths.to_key(source_path);
        let dest_key = paths.to_key(dest_path);

        if info.size <= self.config.threshold {
            debug!("copying {} -> {} ({} bytes) in one request", source_key, dest_key, info.size);
            return self
                .client
                .copy(&source_key, &dest_key, &object_options())
                .await
                .map_err(|e| DriverError::from_transport(source_path, e));
        }

        self.copy_multipart(&source_key, &dest_key, info.size, cancel).await
    }

    async fn copy_multipart(
        &self,
        source_key: &str,
        dest_key: &str,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let upload_id = self
            .client
            .initiate_multipart_upload(dest_key, &object_options())
            .await?;

        let ranges = part_ranges(size, self.config.chunk_size);
        let num_parts = ranges.len();
        info!(
            "copying {} -> {} ({} bytes) as {} parts, concurrency {}",
            source_key, dest_key, size, num_parts, self.config.max_concurrency
        );

        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let (tx, mut rx) = mpsc::channel::<(usize, Result<String>)>(num_parts);

        for (idx, range) in ranges.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let tx = tx.clone();
            let source_key = source_key.to_string();
            let dest_key = dest_key.to_string();
            let upload_id = upload_id.clone();

            tokio::spawn(async move {
                let part_number = idx as i32 + 1;
                let work = async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|e| anyhow!("semaphore closed: {}", e))?;
                    trace!("copying part {} ({})", part_number, range.header_value());
                    client
                        .upload_part_copy(&dest_key, &upload_id, part_number, &source_key, Some(range))
                        .await
                        .map_err(DriverError::from)
                };
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(DriverError::Cancelled),
                    r = work => r,
                };
                // The collector may already have given up.
                let _ = tx.send((idx, result)).await;
            });
        }
        drop(tx);

        let mut slots: Vec<Option<String>> = vec![None; num_parts];
        let mut received = 0usize;
        let mut failure = None;
        while received < num_parts {
            let msg = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    failure = Some(DriverError::Cancelled);
                    break;
                }
                msg = rx.recv() => msg,
            };
            let Some((idx, result)) = msg else {
                failure = Some(anyhow!("part copy tasks ended after {} of {} parts", received, num_parts).into());
                break;
            };
            received += 1;
            match result {
                Ok(etag) => slots[idx] = Some(etag),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            token.cancel();
            warn!("copy of {} failed, aborting upload {}: {}", source_key, upload_id, err);
            self.abort(dest_key, &upload_id).await;
            return Err(err);
        }

        let parts: Vec<CompletedPart> = slots
            .into_iter()
            .enumerate()
            .filter_map(|(idx, etag)| {
                etag.map(|etag| CompletedPart { part_number: idx as i32 + 1, etag })
            })
            .collect();

        if let Err(e) = self
            .client
            .complete_multipart_upload(dest_key, &upload_id, &parts)
            .await
        {
            self.abort(dest_key, &upload_id).await;
            return Err(e.into());
        }
        debug!("completed copy upload {} with {} parts", upload_id, parts.len());
        Ok(())
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.client.abort_multipart_upload(key, upload_id).await {
            warn!("abort of {} failed: {}", upload_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ObjectOptions;
    use crate::transport::memory::{FaultPoint, MemoryClient};
    use bytes::Bytes;
    use std::time::Duration;

    const MIB: u64 = 1 << 20;

    fn small_config(threshold: u64, max_concurrency: usize) -> CopyConfig {
        CopyConfig { threshold, chunk_size: MIB, max_concurrency }
    }

    async fn setup(size: usize, mem: MemoryClient) -> (Arc<MemoryClient>, Arc<dyn ObjectClient>, Bytes) {
        let data: Bytes = (0..size).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
        mem.put("src", data.clone(), &ObjectOptions::default()).await.unwrap();
        let mem = Arc::new(mem);
        let c: Arc<dyn ObjectClient> = mem.clone();
        (mem, c, data)
    }

    #[test]
    fn test_part_ranges() {
        let r = part_ranges(2 * MIB + 1, MIB);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0], ByteRange { first: 0, last: MIB - 1 });
        assert_eq!(r[1], ByteRange { first: MIB, last: 2 * MIB - 1 });
        assert_eq!(r[2], ByteRange { first: 2 * MIB, last: 2 * MIB });
        assert_eq!(part_ranges(MIB, MIB).len(), 1);
        assert!(part_ranges(0, MIB).is_empty());
        assert_eq!(r.iter().map(|r| r.size()).sum::<u64>(), 2 * MIB + 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(CopyConfig::default().validate().is_ok());
        assert!(CopyConfig { chunk_size: 1024, ..Default::default() }.validate().is_err());
        assert!(CopyConfig { max_concurrency: 0, ..Default::default() }.validate().is_err());
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let size = 3 * MIB as usize;
        let (mem, c, data) = setup(size, MemoryClient::default()).await;
        let paths = PathMapper::default();
        let token = CancellationToken::new();

        let at = CopyEngine::new(c.clone(), small_config(size as u64, 4));
        assert_eq!(at.config().threshold, size as u64);
        at.copy(&paths, "/src", "/single", &token).await.unwrap();
        assert_eq!(mem.copy_calls(), 1);
        assert_eq!(mem.upload_part_copy_calls(), 0);
        assert_eq!(mem.object("single").unwrap(), data);

        let below = CopyEngine::new(c, small_config(size as u64 - 1, 4));
        below.copy(&paths, "/src", "/multi", &token).await.unwrap();
        assert_eq!(mem.copy_calls(), 1);
        assert_eq!(mem.upload_part_copy_calls(), 3);
        assert_eq!(mem.object("multi").unwrap(), data);
        assert_eq!(mem.completed_part_sizes(), vec![("multi".to_string(), vec![MIB, MIB, MIB])]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let size = 12 * MIB as usize + 1;
        let mem = MemoryClient::default().with_part_copy_latency(Duration::from_millis(20));
        let (mem, c, data) = setup(size, mem).await;
        let engine = CopyEngine::new(c, small_config(0, 3));

        engine
            .copy(&PathMapper::default(), "/src", "/dst", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(mem.upload_part_copy_calls(), 13);
        assert_eq!(mem.peak_part_copy_concurrency(), 3);
        assert_eq!(mem.object("dst").unwrap(), data);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_destination() {
        let (mem, c, data) = setup(4 * MIB as usize, MemoryClient::default()).await;
        mem.inject_fault(FaultPoint::PartCopy(2));
        let engine = CopyEngine::new(c, small_config(0, 2));

        let err = engine
            .copy(&PathMapper::default(), "/src", "/dst", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"), "{}", err);
        assert_eq!(mem.abort_calls(), 1);
        assert_eq!(mem.complete_calls(), 0);
        assert!(mem.open_uploads().is_empty());
        assert!(mem.object("dst").is_none());
        assert_eq!(mem.object("src").unwrap(), data);
    }

    #[tokio::test]
    async fn test_missing_or_directory_source() {
        let (_mem, c, _) = setup(10, MemoryClient::default()).await;
        c.put("dir/child", Bytes::from_static(b"x"), &ObjectOptions::default()).await.unwrap();
        let engine = CopyEngine::new(c, CopyConfig::default());
        let paths = PathMapper::default();
        let token = CancellationToken::new();

        assert!(engine.copy(&paths, "/missing", "/x", &token).await.unwrap_err().is_not_found());
        assert!(engine.copy(&paths, "/dir", "/x", &token).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (mem, c, _) = setup(10, MemoryClient::default()).await;
        let engine = CopyEngine::new(c, CopyConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            engine.copy(&PathMapper::default(), "/src", "/dst", &token).await,
            Err(DriverError::Cancelled)
        ));
        assert_eq!(mem.copy_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_copy() {
        let mem = MemoryClient::default().with_part_copy_latency(Duration::from_millis(200));
        let (mem, c, _) = setup(4 * MIB as usize, mem).await;
        let engine = CopyEngine::new(c, small_config(0, 1));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = engine
            .copy(&PathMapper::default(), "/src", "/dst", &token)
            .await;
        assert!(matches!(result, Err(DriverError::Cancelled)));
        assert_eq!(mem.abort_calls(), 1);
        assert!(mem.open_uploads().is_empty());
        assert!(mem.object("dst").is_none());
    }
}
