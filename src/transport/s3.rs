// src/transport/s3.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// `ObjectClient` over the AWS Rust SDK, pointed at a COS endpoint.
//
// COS speaks the S3 protocol, so every capability maps onto one SDK call:
// - ListObjects (v1, marker based) for listings
// - CreateMultipartUpload / UploadPart / UploadPartCopy / Complete / Abort
// - DeleteObjects for bulk deletes, CopyObject for single-shot copies
// - presigned GetObject / HeadObject for signed URLs

use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTimeFormat};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as S3CompletedPart, Delete, ObjectCannedAcl,
    ObjectIdentifier,
};
use bytes::Bytes;
use tracing::debug;

use super::{
    ByteRange, CompletedPart, ListPage, ListRequest, MultipartUploadInfo, ObjectClient,
    ObjectOptions, ObjectReader, ObjectSummary, PartInfo, PresignMethod,
};
use crate::config::DriverParameters;
use crate::error::{TransportError, TransportResult};

#[derive(Clone, Debug)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Wraps an already configured SDK client.
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }

    /// Builds an SDK client from driver parameters: static credentials, the
    /// configured region and the derived (or overridden) endpoint.
    pub async fn connect(params: &DriverParameters) -> anyhow::Result<Self> {
        let creds = Credentials::new(
            params.secret_id.clone(),
            params.secret_key.clone(),
            None,
            None,
            "cosblob",
        );
        let endpoint = params.endpoint_url();
        debug!("connecting to {} (bucket {})", endpoint, params.bucket);

        let cfg = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(params.region.clone()))
            .credentials_provider(creds)
            .endpoint_url(endpoint)
            .load()
            .await;

        // The COS endpoint is virtual-hosted; a custom endpoint is assumed to
        // be an S3-compatible server that wants path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&cfg)
            .force_path_style(params.endpoint.is_some())
            .build();

        Ok(Self::from_client(Client::from_conf(s3_config), params.bucket.clone()))
    }

    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }
}

/// Range header for a read starting at `offset`; none for whole-object reads.
fn range_from(offset: u64) -> Option<String> {
    (offset > 0).then(|| format!("bytes={}-", offset))
}

fn map_sdk_err<E, R>(err: SdkError<E, R>, what: &str, op: &'static str) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    match code.as_deref() {
        Some("NoSuchKey") | Some("NotFound") => TransportError::NoSuchKey(what.to_string()),
        Some("NoSuchUpload") => TransportError::NoSuchUpload(what.to_string()),
        Some("InvalidRange") => TransportError::InvalidRange,
        _ => TransportError::Other(anyhow::Error::new(err).context(format!("{} failed for {}", op, what))),
    }
}

fn apply_acl(private: bool) -> Option<ObjectCannedAcl> {
    private.then_some(ObjectCannedAcl::Private)
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn get(&self, key: &str, offset: u64) -> TransportResult<ObjectReader> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range_from(offset))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, key, "GetObject"))?;
        Ok(Box::new(resp.body.into_async_read()))
    }

    async fn put(&self, key: &str, body: Bytes, opts: &ObjectOptions) -> TransportResult<()> {
        let len = body.len() as i64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(len)
            .set_content_type(opts.content_type.clone())
            .set_acl(apply_acl(opts.private_acl))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, key, "PutObject"))?;
        Ok(())
    }

    async fn list(&self, req: &ListRequest) -> TransportResult<ListPage> {
        let resp = self
            .client
            .list_objects()
            .bucket(&self.bucket)
            .prefix(&req.prefix)
            .set_delimiter(req.delimiter.clone())
            .set_marker(req.marker.clone())
            .max_keys(req.max_keys as i32)
            .send()
            .await
            .map_err(|e| map_sdk_err(e, &req.prefix, "ListObjects"))?;

        let mut page = ListPage::default();
        for obj in resp.contents() {
            let Some(key) = obj.key() else { continue };
            let last_modified = match obj.last_modified() {
                Some(dt) => dt
                    .fmt(DateTimeFormat::DateTime)
                    .with_context(|| format!("formatting LastModified of {}", key))?,
                None => String::new(),
            };
            page.contents.push(ObjectSummary {
                key: key.to_string(),
                size: obj.size().unwrap_or_default().max(0) as u64,
                last_modified,
                etag: obj.e_tag().unwrap_or_default().to_string(),
            });
        }
        page.common_prefixes = resp
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(str::to_string))
            .collect();
        page.is_truncated = resp.is_truncated().unwrap_or(false);
        if page.is_truncated {
            // NextMarker is only returned for delimited listings; otherwise
            // the last key of the page is the marker.
            page.next_marker = resp.next_marker().map(str::to_string).or_else(|| {
                let last_key = page.contents.last().map(|o| o.key.clone());
                let last_prefix = page.common_prefixes.last().cloned();
                last_key.max(last_prefix)
            });
        }
        Ok(page)
    }

    async fn copy(&self, source_key: &str, dest_key: &str, opts: &ObjectOptions) -> TransportResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(self.copy_source(source_key))
            .set_content_type(opts.content_type.clone())
            .set_acl(apply_acl(opts.private_acl))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, source_key, "CopyObject"))?;
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> TransportResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<Result<Vec<_>, _>>()
            .context("building DeleteObjects request")?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .context("building DeleteObjects request")?;

        let resp = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_err(e, &keys[0], "DeleteObjects"))?;

        if let Some(first) = resp.errors().first() {
            return Err(TransportError::Other(anyhow!(
                "DeleteObjects reported {} error(s), first: {} ({})",
                resp.errors().len(),
                first.key().unwrap_or_default(),
                first.message().unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn initiate_multipart_upload(&self, key: &str, opts: &ObjectOptions) -> TransportResult<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(opts.content_type.clone())
            .set_acl(apply_acl(opts.private_acl))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, key, "CreateMultipartUpload"))?;
        let upload_id = resp.upload_id().unwrap_or_default().to_string();
        if upload_id.is_empty() {
            return Err(TransportError::Other(anyhow!(
                "CreateMultipartUpload returned empty upload_id for {}",
                key
            )));
        }
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> TransportResult<String> {
        let len = body.len() as i64;
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(len)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, upload_id, "UploadPart"))?;
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn upload_part_copy(
        &self,
        dest_key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<String> {
        let resp = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(dest_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(self.copy_source(source_key))
            .set_copy_source_range(range.map(|r| r.header_value()))
            .send()
            .await
            .map_err(|e| map_sdk_err(e, source_key, "UploadPartCopy"))?;
        Ok(resp
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .unwrap_or_default()
            .to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        S3CompletedPart::builder()
                            .e_tag(&p.etag)
                            .part_number(p.part_number)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| map_sdk_err(e, upload_id, "CompleteMultipartUpload"))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> TransportResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_err(e, upload_id, "AbortMultipartUpload"))?;
        Ok(())
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> TransportResult<Vec<PartInfo>> {
        let mut out = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_err(e, upload_id, "ListParts"))?;
            for p in resp.parts() {
                out.push(PartInfo {
                    part_number: p.part_number().unwrap_or_default(),
                    etag: p.e_tag().unwrap_or_default().to_string(),
                    size: p.size().unwrap_or_default().max(0) as u64,
                });
            }
            match (resp.is_truncated(), resp.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn list_multipart_uploads(&self, prefix: &str) -> TransportResult<Vec<MultipartUploadInfo>> {
        let mut out = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_multipart_uploads()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(|e| map_sdk_err(e, prefix, "ListMultipartUploads"))?;
            for u in resp.uploads() {
                if let (Some(key), Some(upload_id)) = (u.key(), u.upload_id()) {
                    out.push(MultipartUploadInfo {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                    });
                }
            }
            if resp.is_truncated() != Some(true) {
                break;
            }
            key_marker = resp.next_key_marker().map(str::to_string);
            upload_id_marker = resp.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn presigned_url(
        &self,
        method: PresignMethod,
        key: &str,
        expires_in: Duration,
    ) -> TransportResult<String> {
        let cfg = PresigningConfig::expires_in(expires_in)
            .with_context(|| format!("invalid presign expiry {:?}", expires_in))?;
        let presigned = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(cfg)
                .await
                .map_err(|e| map_sdk_err(e, key, "presign GetObject"))?,
            PresignMethod::Head => self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(cfg)
                .await
                .map_err(|e| map_sdk_err(e, key, "presign HeadObject"))?,
        };
        Ok(presigned.uri().to_string())
    }
}
