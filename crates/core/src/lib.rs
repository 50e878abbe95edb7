//! dynstore-core: dynamic backend routing for object storage
//!
//! This crate provides:
//! - The driver registry mapping backend names to live adapters
//! - The routing context carrying the active routing key
//! - Key resolution for dynamic (`#...`) routing keys
//! - The call interceptor that scopes operations with a routing key
//! - Credential decryption for `ENC(...)` configuration values
//! - The `ObjectStore`/`BackendAdapter` traits and an in-memory backend
//!
//! The crate does not depend on any storage SDK. Adapters for concrete
//! backends live in their own crates and plug in through
//! [`AdapterConverter`].

pub mod client;
pub mod config;
pub mod context;
pub mod converter;
pub mod credential;
pub mod error;
pub mod events;
pub mod health;
pub mod interceptor;
pub mod memory;
pub mod registry;
pub mod resolver;
pub mod traits;

pub use client::StorageClient;
pub use config::{BackendConfig, ConfigManager, ConfigSource, Settings, StaticConfigSource};
pub use converter::{AdapterConverter, ConverterChain};
pub use credential::{Credential, CredentialResolver, Decryptor, PlainDecryptor, RsaDecryptor};
pub use error::{Error, Result};
pub use events::{BroadcastSink, EventKind, EventSink, RegistryEvent};
pub use health::{HealthChecker, HealthReport, HealthStatus};
pub use interceptor::{CallInterceptor, CallSite, RouteTable};
pub use memory::{MemoryAdapter, MemoryConverter};
pub use registry::{DriverRegistry, RegistryBuilder, ShutdownSummary};
pub use resolver::{Invocation, KeyResolver, ResolverChain};
pub use traits::{
    AccessControlPolicy, BackendAdapter, ByteStream, CannedAcl, ListOptions, ListPage, ObjectInfo,
    ObjectStore, PresignMethod,
};
