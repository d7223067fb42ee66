// src/transport/memory.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// In-memory bucket store implementing `ObjectClient`.
//
// Models the parts of the store the driver depends on:
// - sorted keys, prefix/delimiter listings paged by marker
// - multipart sessions with the minimum part size enforced on completion
// - UploadPartCopy over byte ranges, ranged GETs, presigning
//
// Also records what happened (call counts, peak part-copy concurrency, part
// sizes of every completed upload) and can inject failures, so tests can
// assert on the driver's behavior rather than just its results.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{SecondsFormat, Utc};
use tracing::trace;

use super::{
    ByteRange, CompletedPart, ListPage, ListRequest, MultipartUploadInfo, ObjectClient,
    ObjectOptions, ObjectReader, ObjectSummary, PartInfo, PresignMethod,
};
use crate::constants::MIN_CHUNK_SIZE;
use crate::error::{TransportError, TransportResult};

/// Operations that can be told to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultPoint {
    /// UploadPartCopy for the given part number
    PartCopy(i32),
    UploadPart,
    Complete,
    Copy,
    DeleteMulti,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: String,
    etag: String,
}

#[derive(Debug)]
struct Upload {
    key: String,
    seq: u64,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, Upload>,
    next_seq: u64,
    completed: Vec<(String, Vec<u64>)>,
    faults: Vec<FaultPoint>,
}

impl State {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn fault(&self, point: &FaultPoint) -> TransportResult<()> {
        if self.faults.contains(point) {
            return Err(TransportError::Other(anyhow!("injected failure: {:?}", point)));
        }
        Ok(())
    }

    fn store(&mut self, key: &str, data: Bytes) {
        let seq = self.seq();
        let etag = etag_for(&data, seq);
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                etag,
            },
        );
    }
}

#[derive(Debug, Default)]
struct Counters {
    copy: AtomicUsize,
    upload_part: AtomicUsize,
    upload_part_copy: AtomicUsize,
    complete: AtomicUsize,
    abort: AtomicUsize,
    delete_multi: AtomicUsize,
    part_copy_in_flight: AtomicUsize,
    part_copy_peak: AtomicUsize,
}

/// Decrements the in-flight gauge even when the request future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MemoryClient {
    bucket: String,
    min_part_size: u64,
    part_copy_latency: Option<Duration>,
    state: Mutex<State>,
    counters: Counters,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new("memory-bucket")
    }
}

impl MemoryClient {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            min_part_size: MIN_CHUNK_SIZE,
            part_copy_latency: None,
            state: Mutex::new(State::default()),
            counters: Counters::default(),
        }
    }

    /// Overrides the minimum size of non-final parts checked on completion.
    pub fn with_min_part_size(mut self, size: u64) -> Self {
        self.min_part_size = size;
        self
    }

    /// Delays every UploadPartCopy so concurrent requests overlap.
    pub fn with_part_copy_latency(mut self, latency: Duration) -> Self {
        self.part_copy_latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn inject_fault(&self, point: FaultPoint) {
        self.state().faults.push(point);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    /// Overwrites the LastModified value listings report for `key`, verbatim.
    pub fn set_last_modified(&self, key: &str, raw: &str) {
        if let Some(obj) = self.state().objects.get_mut(key) {
            obj.last_modified = raw.to_string();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Upload ids still open (neither completed nor aborted).
    pub fn open_uploads(&self) -> Vec<MultipartUploadInfo> {
        let st = self.state();
        let mut v: Vec<_> = st
            .uploads
            .iter()
            .map(|(id, u)| (u.key.clone(), u.seq, id.clone()))
            .collect();
        v.sort();
        v.into_iter()
            .map(|(key, _, upload_id)| MultipartUploadInfo { key, upload_id })
            .collect()
    }

    /// Part sizes of every completed multipart upload, in completion order.
    pub fn completed_part_sizes(&self) -> Vec<(String, Vec<u64>)> {
        self.state().completed.clone()
    }

    pub fn copy_calls(&self) -> usize {
        self.counters.copy.load(Ordering::SeqCst)
    }

    pub fn upload_part_calls(&self) -> usize {
        self.counters.upload_part.load(Ordering::SeqCst)
    }

    pub fn upload_part_copy_calls(&self) -> usize {
        self.counters.upload_part_copy.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.counters.complete.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.counters.abort.load(Ordering::SeqCst)
    }

    pub fn delete_multi_calls(&self) -> usize {
        self.counters.delete_multi.load(Ordering::SeqCst)
    }

    /// Highest number of UploadPartCopy requests observed in flight at once.
    pub fn peak_part_copy_concurrency(&self) -> usize {
        self.counters.part_copy_peak.load(Ordering::SeqCst)
    }
}

fn etag_for(data: &[u8], seq: u64) -> String {
    let mut h = DefaultHasher::new();
    data.hash(&mut h);
    seq.hash(&mut h);
    format!("\"{:016x}\"", h.finish())
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn get(&self, key: &str, offset: u64) -> TransportResult<ObjectReader> {
        let data = {
            let st = self.state();
            let obj = st
                .objects
                .get(key)
                .ok_or_else(|| TransportError::NoSuchKey(key.to_string()))?;
            obj.data.clone()
        };
        let len = data.len() as u64;
        if offset > 0 && offset >= len {
            return Err(TransportError::InvalidRange);
        }
        Ok(Box::new(Cursor::new(data.slice(offset as usize..))))
    }

    async fn put(&self, key: &str, body: Bytes, _opts: &ObjectOptions) -> TransportResult<()> {
        self.state().store(key, body);
        Ok(())
    }

    async fn list(&self, req: &ListRequest) -> TransportResult<ListPage> {
        let st = self.state();
        let max_keys = if req.max_keys == 0 { 1000 } else { req.max_keys as usize };
        let delimiter = req.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut page = ListPage::default();
        let mut prefixes_seen = BTreeSet::new();
        let mut emitted = 0usize;
        let mut last: Option<String> = None;

        for (key, obj) in st.objects.iter() {
            if !key.starts_with(&req.prefix) {
                continue;
            }
            if let Some(marker) = &req.marker {
                if key.as_str() <= marker.as_str() {
                    continue;
                }
                // A marker that is a common prefix skips everything under it.
                if let Some(d) = delimiter {
                    if marker.ends_with(d) && key.starts_with(marker.as_str()) {
                        continue;
                    }
                }
            }

            let common = delimiter.and_then(|d| {
                key[req.prefix.len()..]
                    .find(d)
                    .map(|i| key[..req.prefix.len() + i + d.len()].to_string())
            });

            if let Some(cp) = &common {
                if prefixes_seen.contains(cp) {
                    continue;
                }
            }

            if emitted == max_keys {
                page.is_truncated = true;
                page.next_marker = last;
                return Ok(page);
            }

            match common {
                Some(cp) => {
                    prefixes_seen.insert(cp.clone());
                    page.common_prefixes.push(cp.clone());
                    last = Some(cp);
                }
                None => {
                    page.contents.push(ObjectSummary {
                        key: key.clone(),
                        size: obj.data.len() as u64,
                        last_modified: obj.last_modified.clone(),
                        etag: obj.etag.clone(),
                    });
                    last = Some(key.clone());
                }
            }
            emitted += 1;
        }
        Ok(page)
    }

    async fn copy(&self, source_key: &str, dest_key: &str, _opts: &ObjectOptions) -> TransportResult<()> {
        self.counters.copy.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        st.fault(&FaultPoint::Copy)?;
        let data = st
            .objects
            .get(source_key)
            .map(|o| o.data.clone())
            .ok_or_else(|| TransportError::NoSuchKey(source_key.to_string()))?;
        st.store(dest_key, data);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> TransportResult<()> {
        self.counters.delete_multi.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        st.fault(&FaultPoint::DeleteMulti)?;
        for k in keys {
            st.objects.remove(k);
        }
        Ok(())
    }

    async fn initiate_multipart_upload(&self, key: &str, _opts: &ObjectOptions) -> TransportResult<String> {
        let mut st = self.state();
        let seq = st.seq();
        let upload_id = format!("upload-{:08}", seq);
        st.uploads.insert(
            upload_id.clone(),
            Upload { key: key.to_string(), seq, parts: BTreeMap::new() },
        );
        trace!("memory: initiated {} for {}", upload_id, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> TransportResult<String> {
        self.counters.upload_part.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        st.fault(&FaultPoint::UploadPart)?;
        let seq = st.seq();
        let upload = st
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| TransportError::NoSuchUpload(upload_id.to_string()))?;
        let etag = etag_for(&body, seq);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn upload_part_copy(
        &self,
        dest_key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<String> {
        self.counters.upload_part_copy.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.part_copy_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.counters.part_copy_in_flight);
        self.counters.part_copy_peak.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.part_copy_latency {
            tokio::time::sleep(latency).await;
        }

        let mut st = self.state();
        st.fault(&FaultPoint::PartCopy(part_number))?;
        let data = st
            .objects
            .get(source_key)
            .map(|o| o.data.clone())
            .ok_or_else(|| TransportError::NoSuchKey(source_key.to_string()))?;
        let slice = match range {
            Some(r) => {
                if r.first > r.last || r.last >= data.len() as u64 {
                    return Err(TransportError::InvalidRange);
                }
                data.slice(r.first as usize..=r.last as usize)
            }
            None => data,
        };
        let seq = st.seq();
        let upload = st
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == dest_key)
            .ok_or_else(|| TransportError::NoSuchUpload(upload_id.to_string()))?;
        let etag = etag_for(&slice, seq);
        upload.parts.insert(part_number, (etag.clone(), slice));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<()> {
        self.counters.complete.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        st.fault(&FaultPoint::Complete)?;
        let upload = st
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| TransportError::NoSuchUpload(upload_id.to_string()))?;

        if parts.is_empty() {
            return Err(TransportError::Other(anyhow!("complete with no parts")));
        }
        let mut body = BytesMut::new();
        let mut sizes = Vec::with_capacity(parts.len());
        let mut prev = 0;
        for (i, p) in parts.iter().enumerate() {
            if p.part_number <= prev {
                return Err(TransportError::Other(anyhow!(
                    "parts out of order: {} after {}",
                    p.part_number,
                    prev
                )));
            }
            prev = p.part_number;
            let (etag, data) = upload.parts.get(&p.part_number).ok_or_else(|| {
                TransportError::Other(anyhow!("part {} was never uploaded", p.part_number))
            })?;
            if *etag != p.etag {
                return Err(TransportError::Other(anyhow!("etag mismatch for part {}", p.part_number)));
            }
            let is_last = i + 1 == parts.len();
            if !is_last && (data.len() as u64) < self.min_part_size {
                return Err(TransportError::Other(anyhow!(
                    "EntityTooSmall: part {} is {} bytes",
                    p.part_number,
                    data.len()
                )));
            }
            sizes.push(data.len() as u64);
            body.extend_from_slice(data);
        }

        st.uploads.remove(upload_id);
        st.store(key, body.freeze());
        st.completed.push((key.to_string(), sizes));
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> TransportResult<()> {
        self.counters.abort.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state();
        match st.uploads.get(upload_id) {
            Some(u) if u.key == key => {
                st.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(TransportError::NoSuchUpload(upload_id.to_string())),
        }
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> TransportResult<Vec<PartInfo>> {
        let st = self.state();
        let upload = st
            .uploads
            .get(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| TransportError::NoSuchUpload(upload_id.to_string()))?;
        Ok(upload
            .parts
            .iter()
            .map(|(n, (etag, data))| PartInfo {
                part_number: *n,
                etag: etag.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn list_multipart_uploads(&self, prefix: &str) -> TransportResult<Vec<MultipartUploadInfo>> {
        Ok(self
            .open_uploads()
            .into_iter()
            .filter(|u| u.key.starts_with(prefix))
            .collect())
    }

    async fn presigned_url(
        &self,
        method: PresignMethod,
        key: &str,
        expires_in: Duration,
    ) -> TransportResult<String> {
        let method = match method {
            PresignMethod::Get => "GET",
            PresignMethod::Head => "HEAD",
        };
        Ok(format!(
            "memory://{}/{}?method={}&expires={}",
            self.bucket,
            key,
            method,
            expires_in.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(r: ObjectReader) -> Vec<u8> {
        let mut r = r;
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_delimited_listing_pages() {
        let c = MemoryClient::default();
        let opts = ObjectOptions::default();
        for k in ["a/1", "a/2", "a/sub/x", "a/sub/y", "a/z/q", "b"] {
            c.put(k, Bytes::from_static(b"x"), &opts).await.unwrap();
        }

        let mut req = ListRequest {
            prefix: "a/".into(),
            delimiter: Some("/".into()),
            marker: None,
            max_keys: 2,
        };
        let p1 = c.list(&req).await.unwrap();
        assert_eq!(p1.contents.iter().map(|o| o.key.as_str()).collect::<Vec<_>>(), ["a/1", "a/2"]);
        assert!(p1.is_truncated);

        req.marker = p1.next_marker.clone();
        let p2 = c.list(&req).await.unwrap();
        assert!(p2.contents.is_empty());
        assert_eq!(p2.common_prefixes, ["a/sub/", "a/z/"]);
        assert!(!p2.is_truncated);
    }

    #[tokio::test]
    async fn test_marker_on_common_prefix_skips_children() {
        let c = MemoryClient::default();
        let opts = ObjectOptions::default();
        for k in ["d/x/1", "d/x/2", "d/y"] {
            c.put(k, Bytes::from_static(b"x"), &opts).await.unwrap();
        }
        let req = ListRequest {
            prefix: "d/".into(),
            delimiter: Some("/".into()),
            marker: Some("d/x/".into()),
            max_keys: 10,
        };
        let p = c.list(&req).await.unwrap();
        assert!(p.common_prefixes.is_empty());
        assert_eq!(p.contents.len(), 1);
        assert_eq!(p.contents[0].key, "d/y");
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let c = MemoryClient::default();
        c.put("k", Bytes::from_static(b"hello"), &ObjectOptions::default()).await.unwrap();
        assert_eq!(read_all(c.get("k", 2).await.unwrap()).await, b"llo");
        assert!(matches!(c.get("k", 5).await, Err(TransportError::InvalidRange)));
        assert!(matches!(c.get("nope", 0).await, Err(TransportError::NoSuchKey(_))));
    }

    #[tokio::test]
    async fn test_complete_enforces_min_part_size() {
        let c = MemoryClient::default().with_min_part_size(4);
        let id = c.initiate_multipart_upload("k", &ObjectOptions::default()).await.unwrap();
        let e1 = c.upload_part("k", &id, 1, Bytes::from_static(b"ab")).await.unwrap();
        let e2 = c.upload_part("k", &id, 2, Bytes::from_static(b"cd")).await.unwrap();
        let parts = vec![
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        assert!(c.complete_multipart_upload("k", &id, &parts).await.is_err());
        assert!(c.object("k").is_none());
        assert_eq!(c.open_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_multipart_round_trip_and_part_copy() {
        let c = MemoryClient::default().with_min_part_size(2);
        let opts = ObjectOptions::default();
        c.put("src", Bytes::from_static(b"0123456789"), &opts).await.unwrap();

        let id = c.initiate_multipart_upload("dst", &opts).await.unwrap();
        let e1 = c
            .upload_part_copy("dst", &id, 1, "src", Some(ByteRange { first: 0, last: 4 }))
            .await
            .unwrap();
        let e2 = c
            .upload_part_copy("dst", &id, 2, "src", Some(ByteRange { first: 5, last: 9 }))
            .await
            .unwrap();
        assert_eq!(c.list_parts("dst", &id).await.unwrap().len(), 2);
        c.complete_multipart_upload(
            "dst",
            &id,
            &[CompletedPart { part_number: 1, etag: e1 }, CompletedPart { part_number: 2, etag: e2 }],
        )
        .await
        .unwrap();
        assert_eq!(c.object("dst").unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(c.completed_part_sizes(), vec![("dst".to_string(), vec![5, 5])]);
        assert!(c.open_uploads().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let c = MemoryClient::default();
        c.inject_fault(FaultPoint::DeleteMulti);
        assert!(c.delete_multi(&["x".to_string()]).await.is_err());
        c.clear_faults();
        assert!(c.delete_multi(&["x".to_string()]).await.is_ok());
        assert_eq!(c.delete_multi_calls(), 2);
    }
}
