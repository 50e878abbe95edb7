//! High-level storage client
//!
//! Wraps a [`DriverRegistry`] so application code can work with the routed
//! backend without naming a bucket every time. An absent bucket maps to the
//! active backend's `default_bucket`; both bucket and object names go
//! through pluggable mappers before reaching the adapter.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::registry::DriverRegistry;
use crate::traits::{
    AccessControlPolicy, BackendAdapter, ByteStream, CannedAcl, ListOptions, ListPage, ObjectInfo,
    ObjectStore, PresignMethod, byte_stream, collect_stream, list_pages,
};

/// Maps the bucket a caller asked for to the bucket the backend uses
pub type BucketMapper = Arc<dyn Fn(&BackendConfig, Option<&str>) -> Option<String> + Send + Sync>;

/// Maps the object key a caller asked for to the key the backend uses
pub type ObjectMapper = Arc<dyn Fn(&BackendConfig, &str) -> String + Send + Sync>;

fn default_bucket_mapper() -> BucketMapper {
    Arc::new(|config: &BackendConfig, bucket: Option<&str>| match bucket {
        Some(bucket) if !bucket.is_empty() => Some(bucket.to_string()),
        _ => config.default_bucket.clone(),
    })
}

fn identity_object_mapper() -> ObjectMapper {
    Arc::new(|_: &BackendConfig, key: &str| key.to_string())
}

/// Storage operations against the currently routed backend
#[derive(Clone)]
pub struct StorageClient {
    registry: Arc<DriverRegistry>,
    bucket_mapper: BucketMapper,
    object_mapper: ObjectMapper,
}

impl StorageClient {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            bucket_mapper: default_bucket_mapper(),
            object_mapper: identity_object_mapper(),
        }
    }

    pub fn with_bucket_mapper(
        mut self,
        mapper: impl Fn(&BackendConfig, Option<&str>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.bucket_mapper = Arc::new(mapper);
        self
    }

    pub fn with_object_mapper(
        mut self,
        mapper: impl Fn(&BackendConfig, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.object_mapper = Arc::new(mapper);
        self
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Name of the backend the current routing context selects
    pub fn backend_name(&self) -> Result<String> {
        Ok(self.registry.current()?.name().to_string())
    }

    // Resolve the adapter once so every step of an operation hits the same backend
    fn target(&self, bucket: Option<&str>) -> Result<(Arc<dyn BackendAdapter>, String)> {
        let adapter = self.registry.current()?;
        let bucket = (self.bucket_mapper)(adapter.configuration(), bucket).ok_or_else(|| {
            Error::Config(format!(
                "No bucket given and backend '{}' has no default bucket",
                adapter.name()
            ))
        })?;
        Ok((adapter, bucket))
    }

    fn object_key(&self, adapter: &Arc<dyn BackendAdapter>, key: &str) -> String {
        (self.object_mapper)(adapter.configuration(), key)
    }

    /// Bucket an operation on `bucket` would use right now
    pub fn bucket_for(&self, bucket: Option<&str>) -> Result<String> {
        self.target(bucket).map(|(_, bucket)| bucket)
    }

    pub async fn upload(
        &self,
        bucket: Option<&str>,
        key: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        let data = data.into();
        let size = data.len() as u64;
        self.upload_stream(bucket, key, byte_stream(data), Some(size), content_type)
            .await
    }

    pub async fn upload_stream(
        &self,
        bucket: Option<&str>,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        tracing::debug!(backend = adapter.name(), bucket = %bucket, key = %key, "Uploading object");
        adapter
            .put_object(&bucket, &key, body, size, content_type)
            .await
    }

    pub async fn download(&self, bucket: Option<&str>, key: &str) -> Result<Bytes> {
        collect_stream(self.open(bucket, key).await?).await
    }

    pub async fn open(&self, bucket: Option<&str>, key: &str) -> Result<ByteStream> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        adapter.get_object(&bucket, &key).await
    }

    pub async fn remove(&self, bucket: Option<&str>, key: &str) -> Result<()> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        adapter.delete_object(&bucket, &key).await
    }

    pub async fn exists(&self, bucket: Option<&str>, key: &str) -> Result<bool> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        adapter.object_exists(&bucket, &key).await
    }

    /// Metadata of one object, found through a listing of its exact key
    pub async fn stat(&self, bucket: Option<&str>, key: &str) -> Result<ObjectInfo> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        let options = ListOptions {
            prefix: Some(key.clone()),
            recursive: true,
            ..Default::default()
        };
        let mut pages = Box::pin(list_pages(adapter.as_ref(), &bucket, options));
        while let Some(page) = pages.try_next().await? {
            if let Some(info) = page.items.into_iter().find(|info| info.key == key) {
                return Ok(info);
            }
        }
        Err(Error::NotFound(format!("Object not found: {bucket}/{key}")))
    }

    pub async fn list(&self, bucket: Option<&str>, options: ListOptions) -> Result<ListPage> {
        let (adapter, bucket) = self.target(bucket)?;
        adapter.list_objects(&bucket, options).await
    }

    /// Every entry of a listing, following continuation tokens
    pub async fn list_all(&self, bucket: Option<&str>, options: ListOptions) -> Result<Vec<ObjectInfo>> {
        let (adapter, bucket) = self.target(bucket)?;
        let pages: Vec<ListPage> = list_pages(adapter.as_ref(), &bucket, options)
            .try_collect()
            .await?;
        Ok(pages.into_iter().flat_map(|page| page.items).collect())
    }

    pub async fn bucket_exists(&self, bucket: Option<&str>) -> Result<bool> {
        let (adapter, bucket) = self.target(bucket)?;
        adapter.bucket_exists(&bucket).await
    }

    pub async fn create_bucket(&self, bucket: Option<&str>) -> Result<String> {
        let (adapter, bucket) = self.target(bucket)?;
        adapter.create_bucket(&bucket).await?;
        Ok(bucket)
    }

    pub async fn delete_bucket(&self, bucket: Option<&str>) -> Result<String> {
        let (adapter, bucket) = self.target(bucket)?;
        adapter.delete_bucket(&bucket).await?;
        Ok(bucket)
    }

    pub async fn set_acl(&self, bucket: Option<&str>, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = key.map(|key| self.object_key(&adapter, key));
        adapter.set_acl(&bucket, key.as_deref(), acl).await
    }

    pub async fn get_acl(&self, bucket: Option<&str>, key: Option<&str>) -> Result<AccessControlPolicy> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = key.map(|key| self.object_key(&adapter, key));
        adapter.get_acl(&bucket, key.as_deref()).await
    }

    pub async fn presign(
        &self,
        bucket: Option<&str>,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String> {
        let (adapter, bucket) = self.target(bucket)?;
        let key = self.object_key(&adapter, key);
        adapter.presign_url(&bucket, &key, method, ttl).await
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
