//! Bucket client for blob GET/PUT/HEAD.
//!
//! Uses the `object_store` crate for a unified interface to S3 and
//! MinIO; the in-memory backend backs the test suite with the same code
//! path.

use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::ObjectKey;

#[derive(Debug, Clone)]
pub struct BucketClient {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl BucketClient {
    /// Client against the configured S3-compatible bucket.
    pub fn s3(config: &Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        let store = builder.build().map_err(Error::Store)?;
        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// In-memory bucket. Clones share the same storage, which lets tests
    /// run several sessions against one fake bucket.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: "memory".to_string(),
        }
    }

    /// Fetch the blob stored under `key`. A structurally absent key is
    /// reported as [`Error::KeyNotFound`], distinct from transport
    /// failures.
    pub async fn download(&self, key: &ObjectKey) -> Result<Bytes> {
        if key.as_str().is_empty() {
            return Err(Error::InvalidArgument("empty object key"));
        }
        tracing::debug!(bucket = %self.bucket, %key, "download");
        let result = self
            .store
            .get(&Path::from(key.as_str()))
            .await
            .map_err(|err| match err {
                object_store::Error::NotFound { .. } => Error::KeyNotFound(key.clone()),
                other => Error::Store(other),
            })?;
        result.bytes().await.map_err(Error::Store)
    }

    /// Whole-object PUT. Idempotent: re-uploading identical bytes under
    /// the same key is safe.
    pub async fn upload(&self, key: &ObjectKey, data: Bytes) -> Result<()> {
        if key.as_str().is_empty() {
            return Err(Error::InvalidArgument("empty object key"));
        }
        tracing::debug!(bucket = %self.bucket, %key, len = data.len(), "upload");
        self.store
            .put(&Path::from(key.as_str()), PutPayload::from(data))
            .await
            .map_err(Error::Store)?;
        Ok(())
    }

    pub async fn exists(&self, key: &ObjectKey) -> bool {
        if key.as_str().is_empty() {
            return false;
        }
        self.store.head(&Path::from(key.as_str())).await.is_ok()
    }

    /// Number of blobs in the bucket; test-only, backed by a full LIST.
    #[cfg(test)]
    pub(crate) async fn object_count(&self) -> usize {
        use futures::TryStreamExt;
        self.store
            .list(None)
            .try_collect::<Vec<_>>()
            .await
            .map(|objects| objects.len())
            .unwrap_or(0)
    }
}
