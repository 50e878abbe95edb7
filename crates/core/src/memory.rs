//! In-memory backend
//!
//! A complete [`BackendAdapter`] that keeps buckets and objects in process
//! memory. Used for local development, for scratch backends and by tests.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use parking_lot::RwLock;

use crate::config::{BACKEND_TYPE_MEMORY, BackendConfig};
use crate::converter::AdapterConverter;
use crate::credential::CredentialResolver;
use crate::error::{Error, Result};
use crate::traits::{
    AccessControlPolicy, BackendAdapter, ByteStream, CannedAcl, ListOptions, ListPage, ObjectInfo,
    ObjectStore, PresignMethod, byte_stream, collect_stream,
};

const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: Timestamp,
    etag: String,
    acl: CannedAcl,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        let mut info = ObjectInfo::file(key, self.data.len() as i64);
        info.last_modified = Some(self.last_modified);
        info.etag = Some(self.etag.clone());
        info.content_type = self.content_type.clone();
        info
    }
}

#[derive(Debug, Default)]
struct MemoryBucket {
    objects: BTreeMap<String, StoredObject>,
    acl: CannedAcl,
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Backend kept entirely in memory
#[derive(Debug)]
pub struct MemoryAdapter {
    config: BackendConfig,
    buckets: RwLock<BTreeMap<String, MemoryBucket>>,
    closed: AtomicBool,
}

impl MemoryAdapter {
    /// Build an adapter; the configuration must pass [`BackendConfig::pre_check`]
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.pre_check()?;

        let mut buckets = BTreeMap::new();
        if config.auto_create_bucket
            && let Some(bucket) = &config.default_bucket
        {
            buckets.insert(bucket.clone(), MemoryBucket::default());
        }

        Ok(Self {
            config,
            buckets: RwLock::new(buckets),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::BackendOperationFailed(format!(
                "Backend '{}' is closed",
                self.config.name
            )))
        } else {
            Ok(())
        }
    }

    fn missing_bucket(bucket: &str) -> Error {
        Error::NotFound(format!("Bucket not found: {bucket}"))
    }

    fn missing_object(bucket: &str, key: &str) -> Error {
        Error::NotFound(format!("Object not found: {bucket}/{key}"))
    }

    fn owner(&self) -> &str {
        &self.config.name
    }
}

#[async_trait]
impl ObjectStore for MemoryAdapter {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        self.ensure_open()?;
        if !self.bucket_exists(bucket).await? {
            return Err(Self::missing_bucket(bucket));
        }

        let data = collect_stream(body).await?;
        if let Some(expected) = size
            && expected != data.len() as u64
        {
            return Err(Error::BackendOperationFailed(format!(
                "Body of {bucket}/{key} is {} bytes, expected {expected}",
                data.len()
            )));
        }

        let object = StoredObject {
            etag: etag_of(&data),
            data,
            content_type: content_type.map(str::to_string),
            last_modified: Timestamp::now(),
            acl: CannedAcl::default(),
        };
        let info = object.info(key);

        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        target.objects.insert(key.to_string(), object);
        Ok(info)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        self.ensure_open()?;
        let buckets = self.buckets.read();
        let data = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?
            .objects
            .get(key)
            .ok_or_else(|| Self::missing_object(bucket, key))?
            .data
            .clone();
        Ok(byte_stream(data))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_open()?;
        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        // Deleting an absent key succeeds, as on S3
        target.objects.remove(key);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        self.ensure_open()?;
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;

        let prefix = options.prefix.as_deref().unwrap_or("");
        let mut entries: BTreeMap<String, ObjectInfo> = BTreeMap::new();
        for (key, object) in target.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if !options.recursive
                && let Some(slash) = rest.find('/')
            {
                let dir = format!("{prefix}{}", &rest[..=slash]);
                entries.entry(dir.clone()).or_insert_with(|| ObjectInfo::dir(dir));
                continue;
            }
            entries.insert(key.clone(), object.info(key));
        }

        let max_keys = options
            .max_keys
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_KEYS);
        let mut remaining = entries
            .into_iter()
            .filter(|(key, _)| {
                options
                    .continuation_token
                    .as_deref()
                    .is_none_or(|token| key.as_str() > token)
            })
            .map(|(_, info)| info);

        let items: Vec<ObjectInfo> = remaining.by_ref().take(max_keys).collect();
        let truncated = remaining.next().is_some();
        let continuation_token = if truncated {
            items.last().map(|info| info.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            items,
            truncated,
            continuation_token,
        })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .buckets
            .read()
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(key)))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(Error::BackendOperationFailed(format!(
                "Bucket already exists: {bucket}"
            )));
        }
        buckets.insert(bucket.to_string(), MemoryBucket::default());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        let mut buckets = self.buckets.write();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        if !target.objects.is_empty() {
            return Err(Error::BackendOperationFailed(format!(
                "Bucket is not empty: {bucket}"
            )));
        }
        buckets.remove(bucket);
        Ok(())
    }

    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        self.ensure_open()?;
        let mut buckets = self.buckets.write();
        let target = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        match key {
            Some(key) => {
                target
                    .objects
                    .get_mut(key)
                    .ok_or_else(|| Self::missing_object(bucket, key))?
                    .acl = acl;
            }
            None => target.acl = acl,
        }
        Ok(())
    }

    async fn get_acl(&self, bucket: &str, key: Option<&str>) -> Result<AccessControlPolicy> {
        self.ensure_open()?;
        let buckets = self.buckets.read();
        let target = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        let acl = match key {
            Some(key) => {
                target
                    .objects
                    .get(key)
                    .ok_or_else(|| Self::missing_object(bucket, key))?
                    .acl
            }
            None => target.acl,
        };
        Ok(AccessControlPolicy {
            owner: Some(self.owner().to_string()),
            grants: acl.grants(self.owner()),
        })
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String> {
        self.ensure_open()?;
        let expires = Timestamp::now()
            .checked_add(jiff::SignedDuration::try_from(ttl).map_err(|e| {
                Error::General(format!("Invalid expiry: {e}"))
            })?)
            .map_err(|e| Error::General(format!("Invalid expiry: {e}")))?;
        Ok(format!(
            "memory://{}/{bucket}/{key}?method={}&expires={}",
            self.config.name,
            method.as_str(),
            expires.as_second()
        ))
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn configuration(&self) -> &BackendConfig {
        &self.config
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(backend = %self.config.name, "Memory backend closed");
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_open()
    }
}

/// Builds [`MemoryAdapter`]s for backends of type `memory`
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryConverter;

#[async_trait]
impl AdapterConverter for MemoryConverter {
    fn name(&self) -> &str {
        BACKEND_TYPE_MEMORY
    }

    async fn convert(
        &self,
        config: &BackendConfig,
        _credentials: &CredentialResolver,
    ) -> Result<Option<Arc<dyn BackendAdapter>>> {
        if config.backend_type != BACKEND_TYPE_MEMORY {
            return Ok(None);
        }
        Ok(Some(Arc::new(MemoryAdapter::new(config.clone())?)))
    }
}
