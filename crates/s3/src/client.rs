//! S3 adapter implementation
//!
//! Wraps aws-sdk-s3 and implements the `ObjectStore`/`BackendAdapter` traits
//! from dynstore-core for one configured backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{
    BucketCannedAcl, CompletedMultipartUpload, CompletedPart, ObjectCannedAcl,
};
use bytes::{Bytes, BytesMut};
use dynstore_core::traits::{Grant, Permission};
use futures::StreamExt;
use dynstore_core::{
    AccessControlPolicy, BackendAdapter, BackendConfig, ByteStream, CannedAcl, CredentialResolver,
    Error, ListOptions, ListPage, ObjectInfo, ObjectStore, PresignMethod, Result,
};
use jiff::Timestamp;

/// Bodies larger than one part go up as a multipart upload. S3 requires
/// every part but the last to be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 backend connection
pub struct S3Adapter {
    inner: aws_sdk_s3::Client,
    config: BackendConfig,
    closed: AtomicBool,
}

impl S3Adapter {
    /// Connect to the backend described by `config`
    ///
    /// Credentials go through `credentials`, so `ENC(...)` values are
    /// decrypted here. Creates the default bucket when the configuration
    /// asks for it.
    pub async fn connect(config: BackendConfig, credentials: &CredentialResolver) -> Result<Self> {
        config.pre_check()?;
        // Validate before handing the endpoint to the SDK
        config.endpoint_url()?;

        let static_credentials = aws_credential_types::Credentials::new(
            credentials.access_key(&config),
            credentials.secret_key(&config),
            None, // session token
            None, // expiry
            "dynstore-static-credentials",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(static_credentials)
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        let adapter = Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            config,
            closed: AtomicBool::new(false),
        };

        if adapter.config.auto_create_bucket
            && let Some(bucket) = adapter.config.default_bucket.as_deref()
        {
            adapter.ensure_bucket(bucket).await?;
        }

        tracing::info!(
            backend = %adapter.config.name,
            endpoint = %adapter.config.endpoint,
            "Connected S3 backend"
        );
        Ok(adapter)
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
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

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        tracing::info!(backend = %self.config.name, bucket, "Creating default bucket");
        self.create_bucket(bucket).await
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E: std::fmt::Display>(error: &SdkError<E>) -> String {
        match error {
            SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let meta = service_err.raw();
                let mut msg = format!("Service error: {err}");
                if let Some(code) = meta.headers().get("x-amz-error-code") {
                    msg.push_str(&format!(" (code: {code})"));
                }
                msg
            }
            SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {err:?}")
            }
            SdkError::TimeoutError(_) => "Request timeout".to_string(),
            SdkError::DispatchFailure(err) => format!("Network dispatch error: {err:?}"),
            SdkError::ResponseError(err) => format!("Response error: {err:?}"),
            _ => error.to_string(),
        }
    }

    fn is_not_found<E: std::fmt::Display>(error: &SdkError<E>, message: &str) -> bool {
        let status_404 = error
            .raw_response()
            .is_some_and(|response| response.status().as_u16() == 404);
        status_404
            || message.contains("NotFound")
            || message.contains("NoSuchKey")
            || message.contains("NoSuchBucket")
    }

    /// Map an SDK error, turning "not found" responses into `NotFound(missing)`
    fn map_error<E: std::fmt::Display>(error: SdkError<E>, missing: impl FnOnce() -> String) -> Error {
        let message = Self::format_sdk_error(&error);
        if Self::is_not_found(&error, &message) {
            Error::NotFound(missing())
        } else {
            Error::BackendOperationFailed(message)
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<Option<String>> {
        let mut request = self
            .inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(data.len() as i64)
            .body(aws_sdk_s3::primitives::ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
        Ok(response.e_tag().map(trim_etag))
    }

    /// Multipart upload of `first` followed by the rest of `body`
    ///
    /// Aborts the upload on any failure so no orphaned parts remain.
    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        first: Bytes,
        reader: &mut PartReader,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<(u64, Option<String>)> {
        let created = self
            .inner
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
        let upload_id = created.upload_id().map(str::to_string).ok_or_else(|| {
            Error::BackendOperationFailed(format!("No upload id returned for {bucket}/{key}"))
        })?;

        let uploaded = self
            .upload_parts(bucket, key, &upload_id, first, reader, size)
            .await;
        let (parts, total) = match uploaded {
            Ok(uploaded) => uploaded,
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                return Err(e);
            }
        };

        let completed = self
            .inner
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;
        match completed {
            Ok(response) => Ok((total, response.e_tag().map(trim_etag))),
            Err(e) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Err(Self::map_error(e, || format!("Bucket not found: {bucket}")))
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
        size: Option<u64>,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut next = Some(first);

        while let Some(part) = next {
            let part_number = parts.len() as i32 + 1;
            total += part.len() as u64;
            let response = self
                .inner
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(part.len() as i64)
                .body(aws_sdk_s3::primitives::ByteStream::from(part))
                .send()
                .await
                .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .build(),
            );
            tracing::trace!(bucket, key, part_number, "Uploaded part");
            next = reader.next_part().await?;
        }

        check_length(bucket, key, size, total)?;
        Ok((parts, total))
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        let aborted = self
            .inner
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(e) = aborted {
            tracing::warn!(
                backend = %self.config.name,
                bucket,
                key,
                error = %Self::format_sdk_error(&e),
                "Failed to abort multipart upload"
            );
        }
    }

    fn presigning_config(ttl: Duration) -> Result<PresigningConfig> {
        PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| Error::General(format!("presign config: {e}")))
    }
}

/// Regroups an object body into upload parts of `part_size` bytes
struct PartReader {
    body: ByteStream,
    buffer: BytesMut,
    part_size: usize,
}

impl PartReader {
    fn new(body: ByteStream, part_size: usize) -> Self {
        Self {
            body,
            buffer: BytesMut::new(),
            part_size,
        }
    }

    /// Next part, `None` once the body is drained. Only the last part is short.
    async fn next_part(&mut self) -> Result<Option<Bytes>> {
        while self.buffer.len() < self.part_size {
            match self.body.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.buffer.len().min(self.part_size);
        Ok(Some(self.buffer.split_to(take).freeze()))
    }
}

fn check_length(bucket: &str, key: &str, expected: Option<u64>, actual: u64) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(Error::BackendOperationFailed(format!(
            "Body of {bucket}/{key} is {actual} bytes, expected {expected}"
        ))),
        _ => Ok(()),
    }
}

fn to_timestamp(value: &aws_smithy_types::DateTime) -> Option<Timestamp> {
    Timestamp::from_second(value.secs()).ok()
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn to_permission(value: &str) -> Option<Permission> {
    match value {
        "FULL_CONTROL" => Some(Permission::FullControl),
        "READ" => Some(Permission::Read),
        "WRITE" => Some(Permission::Write),
        "READ_ACP" => Some(Permission::ReadAcp),
        "WRITE_ACP" => Some(Permission::WriteAcp),
        _ => None,
    }
}

fn to_grant(grant: &aws_sdk_s3::types::Grant) -> Option<Grant> {
    let grantee = grant.grantee()?;
    let who = grantee
        .id()
        .or_else(|| grantee.uri())
        .or_else(|| grantee.email_address())?;
    let permission = to_permission(grant.permission()?.as_str())?;
    Some(Grant::new(who, permission))
}

#[async_trait]
impl ObjectStore for S3Adapter {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        self.ensure_open()?;
        let mut reader = PartReader::new(body, PART_SIZE);
        let first = reader.next_part().await?.unwrap_or_default();

        // A short first part means the body is already drained
        let (length, etag) = if first.len() < PART_SIZE {
            let length = first.len() as u64;
            check_length(bucket, key, size, length)?;
            (length, self.put_single(bucket, key, first, content_type).await?)
        } else {
            self.put_multipart(bucket, key, first, &mut reader, size, content_type)
                .await?
        };

        let mut info = ObjectInfo::file(key, length as i64);
        info.etag = etag;
        info.content_type = content_type.map(str::to_string);
        info.last_modified = Some(Timestamp::now());
        Ok(info)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        self.ensure_open()?;
        let response = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Object not found: {bucket}/{key}")))?;

        let stream = futures::stream::try_unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(Error::BackendOperationFailed(format!(
                    "Failed to read object body: {e}"
                ))),
            }
        });
        Ok(Box::pin(stream))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Object not found: {bucket}/{key}")))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        self.ensure_open()?;
        let mut request = self.inner.list_objects_v2().bucket(bucket);

        if let Some(prefix) = &options.prefix {
            request = request.prefix(prefix);
        }
        if !options.recursive {
            request = request.delimiter("/");
        }
        if let Some(max) = options.max_keys {
            request = request.max_keys(max);
        }
        if let Some(token) = &options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;

        let mut items = Vec::new();

        // Common prefixes (directories)
        for prefix in response.common_prefixes() {
            if let Some(p) = prefix.prefix() {
                items.push(ObjectInfo::dir(p));
            }
        }

        for object in response.contents() {
            let key = object.key().unwrap_or_default();
            let mut info = ObjectInfo::file(key, object.size().unwrap_or(0));
            info.last_modified = object.last_modified().and_then(to_timestamp);
            info.etag = object.e_tag().map(trim_etag);
            items.push(info);
        }

        Ok(ListPage {
            items,
            truncated: response.is_truncated().unwrap_or(false),
            continuation_token: response.next_continuation_token().map(str::to_string),
        })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.ensure_open()?;
        match self.inner.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => match Self::map_error(e, String::new) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.ensure_open()?;
        match self.inner.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match Self::map_error(e, String::new) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| Error::BackendOperationFailed(Self::format_sdk_error(&e)))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
        Ok(())
    }

    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        self.ensure_open()?;
        match key {
            Some(key) => {
                self.inner
                    .put_object_acl()
                    .bucket(bucket)
                    .key(key)
                    .acl(ObjectCannedAcl::from(acl.as_str()))
                    .send()
                    .await
                    .map_err(|e| Self::map_error(e, || format!("Object not found: {bucket}/{key}")))?;
            }
            None => {
                self.inner
                    .put_bucket_acl()
                    .bucket(bucket)
                    .acl(BucketCannedAcl::from(acl.as_str()))
                    .send()
                    .await
                    .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
            }
        }
        Ok(())
    }

    async fn get_acl(&self, bucket: &str, key: Option<&str>) -> Result<AccessControlPolicy> {
        self.ensure_open()?;
        let (owner, grants) = match key {
            Some(key) => {
                let response = self
                    .inner
                    .get_object_acl()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| Self::map_error(e, || format!("Object not found: {bucket}/{key}")))?;
                (
                    response.owner().and_then(|o| o.id()).map(str::to_string),
                    response.grants().iter().filter_map(to_grant).collect(),
                )
            }
            None => {
                let response = self
                    .inner
                    .get_bucket_acl()
                    .bucket(bucket)
                    .send()
                    .await
                    .map_err(|e| Self::map_error(e, || format!("Bucket not found: {bucket}")))?;
                (
                    response.owner().and_then(|o| o.id()).map(str::to_string),
                    response.grants().iter().filter_map(to_grant).collect(),
                )
            }
        };
        Ok(AccessControlPolicy { owner, grants })
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String> {
        self.ensure_open()?;
        let config = Self::presigning_config(ttl)?;

        let request = match method {
            PresignMethod::Get => self
                .inner
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| Error::General(format!("presign GET: {e}")))?,
            PresignMethod::Put => self
                .inner
                .put_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| Error::General(format!("presign PUT: {e}")))?,
            PresignMethod::Delete => self
                .inner
                .delete_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| Error::General(format!("presign DELETE: {e}")))?,
            PresignMethod::Head => self
                .inner
                .head_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| Error::General(format!("presign HEAD: {e}")))?,
        };

        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl BackendAdapter for S3Adapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn configuration(&self) -> &BackendConfig {
        &self.config
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(backend = %self.config.name, "S3 backend closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for S3Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Adapter")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
