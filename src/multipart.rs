// src/multipart.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Resumable, chunked writer over a multipart upload.
//
// Design:
// - Bytes are double-buffered into `ready` and `pending`, each topped up to
//   `chunk_size`. A part is uploaded only once `pending` fills, so the part
//   sent is always full-sized and the tail is held back for the final flush.
// - The final flush merges a short `pending` into `ready`, which keeps every
//   non-final part at or above the chunk size.
// - close() flushes but neither completes nor aborts, so the upload can be
//   picked up again with `ChunkedWriter::resume`.
// - A resumed upload whose last part is below the store's minimum part size
//   is completed and restarted before new bytes are accepted (see
//   `repair_small_last_part`).

use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_CONTENT_TYPE, MIN_CHUNK_SIZE};
use crate::error::{DriverError, Result, WriterState};
use crate::object_store::FileWriter;
use crate::transport::{CompletedPart, ObjectClient, ObjectOptions, PartInfo};

/// Options used for every object the driver creates.
pub fn object_options() -> ObjectOptions {
    ObjectOptions {
        content_type: Some(DEFAULT_CONTENT_TYPE.to_string()),
        private_acl: true,
    }
}

pub struct ChunkedWriter {
    client: Arc<dyn ObjectClient>,
    key: String,
    upload_id: String,
    chunk_size: usize,
    parts: Vec<PartInfo>,
    ready: Vec<u8>,
    pending: Vec<u8>,
    size: u64,
    state: WriterState,
}

impl ChunkedWriter {
    /// Starts a fresh multipart upload at `key`.
    pub async fn create(client: Arc<dyn ObjectClient>, key: &str, chunk_size: u64) -> Result<Self> {
        let upload_id = client.initiate_multipart_upload(key, &object_options()).await?;
        debug!("initiated upload {} for {}", upload_id, key);
        Ok(Self::with_parts(client, key, upload_id, Vec::new(), chunk_size))
    }

    /// Picks up the in-flight upload whose key is exactly `key`.
    /// Returns `None` when there is none.
    pub async fn resume(client: Arc<dyn ObjectClient>, key: &str, chunk_size: u64) -> Result<Option<Self>> {
        let uploads = client.list_multipart_uploads(key).await?;
        let Some(upload) = uploads.into_iter().find(|u| u.key == key) else {
            return Ok(None);
        };
        let parts = client.list_parts(key, &upload.upload_id).await?;
        debug!(
            "resuming upload {} for {} with {} part(s)",
            upload.upload_id,
            key,
            parts.len()
        );
        Ok(Some(Self::with_parts(client, key, upload.upload_id, parts, chunk_size)))
    }

    fn with_parts(
        client: Arc<dyn ObjectClient>,
        key: &str,
        upload_id: String,
        mut parts: Vec<PartInfo>,
        chunk_size: u64,
    ) -> Self {
        parts.sort_by_key(|p| p.part_number);
        let size = parts.iter().map(|p| p.size).sum();
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE) as usize;
        Self {
            client,
            key: key.to_string(),
            upload_id,
            chunk_size,
            parts,
            ready: Vec::with_capacity(chunk_size),
            pending: Vec::new(),
            size,
            state: WriterState::Writable,
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn parts(&self) -> &[PartInfo] {
        &self.parts
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(DriverError::AlreadyTerminal(self.state));
        }
        Ok(())
    }

    fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .iter()
            .map(|p| CompletedPart { part_number: p.part_number, etag: p.etag.clone() })
            .collect()
    }

    /// A part below the minimum size may only ever be the final part. When a
    /// resumed upload ends in one, finish that upload and start over with the
    /// finished object as the seed of the new one.
    async fn repair_small_last_part(&mut self) -> Result<()> {
        let small = matches!(self.parts.last(), Some(p) if p.size < MIN_CHUNK_SIZE);
        if !small {
            return Ok(());
        }

        debug!(
            "last part of {} is below {} bytes, restarting upload {}",
            self.key, MIN_CHUNK_SIZE, self.upload_id
        );
        let parts = self.completed_parts();
        if let Err(e) = self
            .client
            .complete_multipart_upload(&self.key, &self.upload_id, &parts)
            .await
        {
            warn!("completing {} for repair failed, aborting: {}", self.upload_id, e);
            if let Err(abort_err) = self.client.abort_multipart_upload(&self.key, &self.upload_id).await {
                warn!("abort of {} failed: {}", self.upload_id, abort_err);
            }
            return Err(e.into());
        }

        let upload_id = self
            .client
            .initiate_multipart_upload(&self.key, &object_options())
            .await?;

        match self.seed(&upload_id).await {
            Ok((ready, parts)) => {
                self.upload_id = upload_id;
                self.ready = ready;
                self.parts = parts;
                Ok(())
            }
            Err(e) => {
                warn!("seeding upload {} for {} failed, aborting: {}", upload_id, self.key, e);
                if let Err(abort_err) = self.client.abort_multipart_upload(&self.key, &upload_id).await {
                    warn!("abort of {} failed: {}", upload_id, abort_err);
                }
                Err(e)
            }
        }
    }

    /// Carries the just-completed object into `upload_id`: read back into the
    /// buffer when it is below the minimum part size, part-copied otherwise.
    async fn seed(&self, upload_id: &str) -> Result<(Vec<u8>, Vec<PartInfo>)> {
        if self.size < MIN_CHUNK_SIZE {
            let mut reader = self.client.get(&self.key, 0).await?;
            let mut contents = Vec::with_capacity(self.size as usize);
            reader
                .read_to_end(&mut contents)
                .await
                .map_err(|e| anyhow::anyhow!("reading back {}: {}", self.key, e))?;
            return Ok((contents, Vec::new()));
        }
        let etag = self
            .client
            .upload_part_copy(&self.key, upload_id, 1, &self.key, None)
            .await?;
        Ok((Vec::new(), vec![PartInfo { part_number: 1, etag, size: self.size }]))
    }

    /// Uploads everything still buffered. A failed `write` can leave both
    /// buffers full, which takes two parts to drain.
    async fn drain(&mut self) -> Result<()> {
        while !self.ready.is_empty() || !self.pending.is_empty() {
            self.flush_part().await?;
        }
        Ok(())
    }

    /// Uploads `ready` (plus a short `pending`) as the next part.
    async fn flush_part(&mut self) -> Result<()> {
        if self.ready.is_empty() && self.pending.is_empty() {
            return Ok(());
        }
        if self.pending.len() < self.chunk_size {
            let pending = mem::take(&mut self.pending);
            self.ready.extend_from_slice(&pending);
        }

        let part_number = self.parts.len() as i32 + 1;
        let body = Bytes::copy_from_slice(&self.ready);
        let size = body.len() as u64;
        let etag = self
            .client
            .upload_part(&self.key, &self.upload_id, part_number, body)
            .await?;
        debug!("uploaded part {} ({} bytes) of {}", part_number, size, self.key);

        self.parts.push(PartInfo { part_number, etag, size });
        self.ready = mem::take(&mut self.pending);
        Ok(())
    }

    /// Appends as much of `src` as fits into `buf` without exceeding the
    /// chunk size; returns the number of bytes taken.
    fn top_up(buf: &mut Vec<u8>, src: &[u8], chunk_size: usize) -> usize {
        let take = chunk_size.saturating_sub(buf.len()).min(src.len());
        buf.extend_from_slice(&src[..take]);
        take
    }
}

#[async_trait]
impl FileWriter for ChunkedWriter {
    async fn write(&mut self, p: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        self.repair_small_last_part().await?;

        let mut n = 0usize;
        while n < p.len() {
            n += Self::top_up(&mut self.ready, &p[n..], self.chunk_size);
            n += Self::top_up(&mut self.pending, &p[n..], self.chunk_size);
            if self.pending.len() == self.chunk_size {
                if let Err(e) = self.flush_part().await {
                    self.size += n as u64;
                    return Err(e);
                }
            }
        }
        self.size += n as u64;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.state = WriterState::Closed;
        self.drain().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.drain().await?;
        self.state = WriterState::Committed;

        if self.parts.is_empty() {
            // Nothing was ever written; the store needs at least one part.
            let etag = self
                .client
                .upload_part(&self.key, &self.upload_id, 1, Bytes::new())
                .await?;
            self.parts.push(PartInfo { part_number: 1, etag, size: 0 });
        }

        let parts = self.completed_parts();
        if let Err(e) = self
            .client
            .complete_multipart_upload(&self.key, &self.upload_id, &parts)
            .await
        {
            warn!("completing upload {} failed, aborting: {}", self.upload_id, e);
            if let Err(abort_err) = self.client.abort_multipart_upload(&self.key, &self.upload_id).await {
                warn!("abort of {} failed: {}", self.upload_id, abort_err);
            }
            return Err(e.into());
        }
        info!("committed {} ({} bytes, {} parts)", self.key, self.size, parts.len());
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.state = WriterState::Cancelled;
        self.client
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await?;
        info!("cancelled upload {} for {}", self.upload_id, self.key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{FaultPoint, MemoryClient};

    const C: usize = MIN_CHUNK_SIZE as usize;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn client() -> (Arc<MemoryClient>, Arc<dyn ObjectClient>) {
        let mem = Arc::new(MemoryClient::default());
        let dyn_client: Arc<dyn ObjectClient> = mem.clone();
        (mem, dyn_client)
    }

    #[tokio::test]
    async fn test_parts_are_full_sized_until_the_last() {
        let (mem, c) = client();
        let data = payload(C * 5 / 2, 1);
        let mut w = ChunkedWriter::create(c, "obj", C as u64).await.unwrap();
        assert_eq!(w.write(&data).await.unwrap(), data.len());
        assert_eq!(w.parts().len(), 1);
        w.commit().await.unwrap();

        assert_eq!(mem.object("obj").unwrap(), Bytes::from(data.clone()));
        assert_eq!(
            mem.completed_part_sizes(),
            vec![("obj".to_string(), vec![C as u64, (C + C / 2) as u64])]
        );
        assert_eq!(w.size(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_many_small_writes() {
        let (mem, c) = client();
        let data = payload(3 * C + 17, 2);
        let mut w = ChunkedWriter::create(c, "obj", C as u64).await.unwrap();
        for chunk in data.chunks(4096 + 3) {
            w.write(chunk).await.unwrap();
        }
        w.commit().await.unwrap();
        assert_eq!(mem.object("obj").unwrap(), Bytes::from(data));
    }

    #[tokio::test]
    async fn test_terminal_states_are_exclusive() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c.clone(), "a", C as u64).await.unwrap();
        w.write(b"abc").await.unwrap();
        w.commit().await.unwrap();
        assert!(matches!(
            w.cancel().await,
            Err(DriverError::AlreadyTerminal(WriterState::Committed))
        ));
        assert!(w.write(b"x").await.is_err());
        assert!(w.commit().await.is_err());
        assert!(w.close().await.is_err());

        let mut w = ChunkedWriter::create(c, "b", C as u64).await.unwrap();
        w.cancel().await.unwrap();
        assert!(matches!(
            w.commit().await,
            Err(DriverError::AlreadyTerminal(WriterState::Cancelled))
        ));
        assert!(mem.object("b").is_none());
        assert_eq!(mem.abort_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_keeps_upload_resumable() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c.clone(), "r", C as u64).await.unwrap();
        w.write(b"hello ").await.unwrap();
        w.close().await.unwrap();
        assert!(matches!(w.write(b"x").await, Err(DriverError::AlreadyTerminal(WriterState::Closed))));
        assert_eq!(mem.open_uploads().len(), 1);
        assert!(mem.object("r").is_none());

        let mut w = ChunkedWriter::resume(c.clone(), "r", C as u64).await.unwrap().unwrap();
        assert_eq!(w.size(), 6);
        w.write(b"world").await.unwrap();
        w.commit().await.unwrap();
        assert_eq!(mem.object("r").unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(w.size(), 11);

        assert!(ChunkedWriter::resume(c, "r", C as u64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_matches_exact_key_only() {
        let (_mem, c) = client();
        let mut w = ChunkedWriter::create(c.clone(), "file-longer", C as u64).await.unwrap();
        w.close().await.unwrap();
        assert!(ChunkedWriter::resume(c, "file", C as u64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_small_last_part_repair_via_part_copy() {
        let (mem, c) = client();
        let first = payload(C + 10, 3);

        let mut w = ChunkedWriter::create(c.clone(), "k", C as u64).await.unwrap();
        w.write(&first).await.unwrap();
        w.close().await.unwrap();

        let mut w = ChunkedWriter::resume(c.clone(), "k", C as u64).await.unwrap().unwrap();
        w.write(b"0123456789").await.unwrap();
        w.close().await.unwrap();

        let mut w = ChunkedWriter::resume(c.clone(), "k", C as u64).await.unwrap().unwrap();
        assert_eq!(w.parts().last().unwrap().size, 10);
        w.write(b"tail!").await.unwrap();
        assert_eq!(w.parts().len(), 1);
        assert_eq!(w.parts()[0].size, (C + 20) as u64);
        w.commit().await.unwrap();

        let mut expected = first.clone();
        expected.extend_from_slice(b"0123456789tail!");
        assert_eq!(mem.object("k").unwrap(), Bytes::from(expected));
        assert_eq!(mem.upload_part_copy_calls(), 1);

        for (_, sizes) in mem.completed_part_sizes() {
            let (_, leading) = sizes.split_last().unwrap();
            assert!(leading.iter().all(|s| *s >= MIN_CHUNK_SIZE), "{:?}", sizes);
        }
    }

    #[tokio::test]
    async fn test_small_last_part_repair_via_download() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c.clone(), "s", C as u64).await.unwrap();
        w.write(b"abc").await.unwrap();
        w.close().await.unwrap();

        let mut w = ChunkedWriter::resume(c.clone(), "s", C as u64).await.unwrap().unwrap();
        w.write(b"def").await.unwrap();
        assert!(w.parts().is_empty());
        w.commit().await.unwrap();

        assert_eq!(mem.object("s").unwrap(), Bytes::from_static(b"abcdef"));
        assert_eq!(mem.upload_part_copy_calls(), 0);
        assert!(mem.open_uploads().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_aborts_upload() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c, "f", C as u64).await.unwrap();
        w.write(b"data").await.unwrap();
        mem.inject_fault(FaultPoint::Complete);
        assert!(w.commit().await.is_err());
        assert_eq!(mem.abort_calls(), 1);
        assert!(mem.open_uploads().is_empty());
        assert!(mem.object("f").is_none());
    }

    #[tokio::test]
    async fn test_empty_commit_creates_empty_object() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c, "empty", C as u64).await.unwrap();
        w.commit().await.unwrap();
        assert_eq!(mem.object("empty").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_size_counts_bytes_accepted_before_flush_error() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c, "e", C as u64).await.unwrap();
        mem.inject_fault(FaultPoint::UploadPart);
        let data = payload(2 * C + 5, 4);
        assert!(w.write(&data).await.is_err());
        assert_eq!(w.size(), (2 * C) as u64);
        assert_eq!(w.state(), WriterState::Writable);
    }

    #[tokio::test]
    async fn test_commit_after_flush_error_keeps_every_accepted_byte() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c, "e", C as u64).await.unwrap();
        mem.inject_fault(FaultPoint::UploadPart);
        let data = payload(2 * C + 5, 4);
        assert!(w.write(&data).await.is_err());

        mem.clear_faults();
        w.commit().await.unwrap();
        let stored = mem.object("e").unwrap();
        assert_eq!(stored.len() as u64, w.size());
        assert_eq!(stored, Bytes::copy_from_slice(&data[..2 * C]));
        assert_eq!(mem.completed_part_sizes(), vec![("e".to_string(), vec![C as u64, C as u64])]);
    }

    #[tokio::test]
    async fn test_close_after_flush_error_drains_both_buffers() {
        let (mem, c) = client();
        let mut w = ChunkedWriter::create(c.clone(), "d", C as u64).await.unwrap();
        mem.inject_fault(FaultPoint::UploadPart);
        let data = payload(2 * C, 5);
        assert!(w.write(&data).await.is_err());

        mem.clear_faults();
        w.close().await.unwrap();
        let w = ChunkedWriter::resume(c, "d", C as u64).await.unwrap().unwrap();
        assert_eq!(w.size(), (2 * C) as u64);
        assert_eq!(w.parts().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_repair_keeps_writer_consistent() {
        let (mem, c) = client();
        let first = payload(C + 10, 6);
        let mut w = ChunkedWriter::create(c.clone(), "k", C as u64).await.unwrap();
        w.write(&first).await.unwrap();
        w.close().await.unwrap();
        let mut w = ChunkedWriter::resume(c.clone(), "k", C as u64).await.unwrap().unwrap();
        w.write(b"0123456789").await.unwrap();
        w.close().await.unwrap();

        let mut w = ChunkedWriter::resume(c, "k", C as u64).await.unwrap().unwrap();
        let old_id = w.upload_id().to_string();
        let old_parts = w.parts().to_vec();
        mem.inject_fault(FaultPoint::PartCopy(1));
        assert!(w.write(b"tail").await.is_err());

        assert_eq!(w.upload_id(), old_id);
        assert_eq!(w.parts(), old_parts.as_slice());
        assert!(mem.open_uploads().is_empty());
        assert_eq!(mem.abort_calls(), 1);
        assert_eq!(mem.object("k").unwrap().len(), C + 20);
    }
}
