// src/driver.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// `CosDriver`: the path-addressed facade. Validates paths, maps them to keys
// and routes each call to the metadata, writer, copy or presign component.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{DriverParameters, ParamValue};
use crate::constants::DRIVER_NAME;
use crate::copy::CopyEngine;
use crate::error::{DriverError, Result, TransportError};
use crate::metadata;
use crate::multipart::{ChunkedWriter, object_options};
use crate::object_store::{FileInfo, FileWriter, StorageDriver};
use crate::paths::{PathMapper, validate_dir_path, validate_path};
use crate::presign::{self, UrlOptions};
use crate::transport::{ObjectClient, S3Client};

pub struct CosDriver {
    client: Arc<dyn ObjectClient>,
    paths: PathMapper,
    chunk_size: u64,
    copier: CopyEngine,
}

impl CosDriver {
    /// Driver over any transport, configured by already validated parameters.
    pub fn new(params: &DriverParameters, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            paths: PathMapper::new(params.root_directory.clone()),
            chunk_size: params.chunk_size,
            copier: CopyEngine::new(Arc::clone(&client), params.copy.clone()),
            client,
        }
    }

    /// Validates a parameter map and connects to the configured COS bucket.
    pub async fn from_parameters(params: &HashMap<String, ParamValue>) -> Result<Self> {
        let params = DriverParameters::from_parameters(params)?;
        Self::connect(&params).await
    }

    pub async fn connect(params: &DriverParameters) -> Result<Self> {
        let client = S3Client::connect(params).await?;
        info!(
            "cos driver ready: bucket={} region={} root={:?}",
            params.bucket, params.region, params.root_directory
        );
        Ok(Self::new(params, Arc::new(client)))
    }

    pub fn path_mapper(&self) -> &PathMapper {
        &self.paths
    }

    /// Move that can be interrupted through `cancel`; the source is only
    /// removed once the copy has fully succeeded.
    pub async fn move_with_cancel(
        &self,
        source_path: &str,
        dest_path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_path(source_path)?;
        validate_path(dest_path)?;

        self.copier.copy(&self.paths, source_path, dest_path, cancel).await?;
        self.client
            .delete_multi(&[self.paths.to_key(source_path)])
            .await?;
        debug!("moved {} -> {}", source_path, dest_path);
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for CosDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        let mut reader = self.reader(path, 0).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path, e))?;
        Ok(Bytes::from(buf))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        validate_path(path)?;
        let key = self.paths.to_key(path);
        debug!("put {} ({} bytes)", key, content.len());
        self.client.put(&key, content, &object_options()).await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        validate_path(path)?;
        let key = self.paths.to_key(path);
        match self.client.get(&key, offset).await {
            Ok(r) => Ok(r),
            Err(TransportError::InvalidRange) => Ok(Box::new(tokio::io::empty())),
            Err(e) => Err(DriverError::from_transport(path, e)),
        }
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        validate_path(path)?;
        let key = self.paths.to_key(path);
        let client = Arc::clone(&self.client);
        let w = if append {
            ChunkedWriter::resume(client, &key, self.chunk_size)
                .await?
                .ok_or_else(|| DriverError::not_found(path))?
        } else {
            ChunkedWriter::create(client, &key, self.chunk_size).await?
        };
        Ok(Box::new(w))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        validate_dir_path(path)?;
        metadata::stat(self.client.as_ref(), &self.paths, path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        validate_dir_path(path)?;
        metadata::list(self.client.as_ref(), &self.paths, path).await
    }

    async fn move_object(&self, source_path: &str, dest_path: &str) -> Result<()> {
        self.move_with_cancel(source_path, dest_path, &CancellationToken::new())
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        metadata::delete(self.client.as_ref(), &self.paths, path).await
    }

    async fn url_for(&self, path: &str, options: &UrlOptions) -> Result<String> {
        validate_path(path)?;
        presign::url_for(self.client.as_ref(), &self.paths, path, options).await
    }
}
