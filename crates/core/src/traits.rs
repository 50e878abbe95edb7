//! Backend operation surface
//!
//! [`ObjectStore`] is the uniform set of object operations every backend
//! offers; [`BackendAdapter`] adds the identity and lifecycle of one
//! configured backend connection. The driver registry implements
//! `ObjectStore` too, delegating to whichever adapter is currently selected.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Streamed object body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a [`ByteStream`]
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into a single buffer
pub async fn collect_stream(mut stream: ByteStream) -> Result<Bytes> {
    use futures::StreamExt;

    let mut buffer = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Metadata about one object or common prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// True for common prefixes returned by delimited listings
    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size_bytes: Some(size),
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: false,
        }
    }

    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size_bytes: None,
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: true,
        }
    }
}

/// Options for a single listing request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
    /// List everything below the prefix instead of grouping by `/`
    pub recursive: bool,
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<ObjectInfo>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

/// Canned access control lists understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
        }
    }

    /// Grants implied by the canned ACL for `owner`
    pub fn grants(&self, owner: &str) -> Vec<Grant> {
        let mut grants = vec![Grant::new(owner, Permission::FullControl)];
        match self {
            CannedAcl::Private => {}
            CannedAcl::PublicRead => grants.push(Grant::new(ALL_USERS, Permission::Read)),
            CannedAcl::PublicReadWrite => {
                grants.push(Grant::new(ALL_USERS, Permission::Read));
                grants.push(Grant::new(ALL_USERS, Permission::Write));
            }
            CannedAcl::AuthenticatedRead => {
                grants.push(Grant::new(AUTHENTICATED_USERS, Permission::Read))
            }
        }
        grants
    }
}

impl std::fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            _ => Err(format!("Invalid canned ACL: {s}")),
        }
    }
}

/// Grantee URI for anonymous access
pub const ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// Grantee URI for any authenticated principal
pub const AUTHENTICATED_USERS: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    FullControl,
    Read,
    Write,
    ReadAcp,
    WriteAcp,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::FullControl => "FULL_CONTROL",
            Permission::Read => "READ",
            Permission::Write => "WRITE",
            Permission::ReadAcp => "READ_ACP",
            Permission::WriteAcp => "WRITE_ACP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Canonical user id or group URI
    pub grantee: String,
    pub permission: Permission,
}

impl Grant {
    pub fn new(grantee: impl Into<String>, permission: Permission) -> Self {
        Self {
            grantee: grantee.into(),
            permission,
        }
    }
}

/// Owner and grants of a bucket or object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub grants: Vec<Grant>,
}

/// HTTP method a presigned URL is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    #[default]
    Get,
    Put,
    Delete,
    Head,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
            PresignMethod::Delete => "DELETE",
            PresignMethod::Head => "HEAD",
        }
    }
}

impl std::str::FromStr for PresignMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(PresignMethod::Get),
            "PUT" => Ok(PresignMethod::Put),
            "DELETE" => Ok(PresignMethod::Delete),
            "HEAD" => Ok(PresignMethod::Head),
            _ => Err(format!("Unsupported presign method: {s}")),
        }
    }
}

/// Uniform object operations offered by every backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload an object; `size` is the body length when known up front
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo>;

    /// Stream an object's content
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Fetch one page of a listing
    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ListPage>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Apply a canned ACL to a bucket, or to an object when `key` is given
    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()>;

    async fn get_acl(&self, bucket: &str, key: Option<&str>) -> Result<AccessControlPolicy>;

    /// Generate a time-limited URL for `method` on an object
    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String>;
}

/// One configured backend connection
#[async_trait]
pub trait BackendAdapter: ObjectStore {
    /// Unique backend name (the routing key that selects it)
    fn name(&self) -> &str;

    /// Configuration the adapter was built from
    fn configuration(&self) -> &BackendConfig;

    /// Release the backend connection. Operations after close fail.
    async fn close(&self) -> Result<()>;

    /// Cheap probe used by health checks
    async fn health_check(&self) -> Result<()> {
        match self.configuration().default_bucket.as_deref() {
            Some(bucket) => self.bucket_exists(bucket).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Walk a listing page by page
///
/// Yields pages until the backend reports the listing is complete; an error
/// ends the stream after being yielded.
pub fn list_pages<'a, S>(
    store: &'a S,
    bucket: &'a str,
    options: ListOptions,
) -> impl Stream<Item = Result<ListPage>> + 'a
where
    S: ObjectStore + ?Sized,
{
    futures::stream::try_unfold(Some(options), move |next| async move {
        let Some(options) = next else {
            return Ok(None);
        };
        let page = store.list_objects(bucket, options.clone()).await?;
        let following = match (&page.truncated, &page.continuation_token) {
            (true, Some(token)) => Some(ListOptions {
                continuation_token: Some(token.clone()),
                ..options
            }),
            (true, None) => {
                return Err(Error::BackendOperationFailed(format!(
                    "Truncated listing of '{bucket}' without continuation token"
                )));
            }
            (false, _) => None,
        };
        Ok(Some((page, following)))
    })
}
