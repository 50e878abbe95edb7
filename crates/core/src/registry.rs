//! Driver registry
//!
//! Holds every configured backend adapter by name and resolves the adapter
//! for the current routing key. Readers work on an immutable snapshot of the
//! adapter map, so a lookup never blocks behind registration; writers build
//! a new map and swap it in. An adapter being removed is closed only after
//! it has left the map.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config::{BackendConfig, Settings};
use crate::context;
use crate::converter::ConverterChain;
use crate::error::{Error, Result};
use crate::events::{EventSink, RegistryEvent};
use crate::traits::{
    AccessControlPolicy, BackendAdapter, ByteStream, CannedAcl, ListOptions, ListPage, ObjectInfo,
    ObjectStore, PresignMethod,
};

type AdapterMap = BTreeMap<String, Arc<dyn BackendAdapter>>;

/// Outcome of [`DriverRegistry::shutdown`]
#[derive(Debug, Default)]
pub struct ShutdownSummary {
    pub closed: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl ShutdownSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Name-keyed set of live backend adapters
pub struct DriverRegistry {
    adapters: RwLock<Arc<AdapterMap>>,
    // Serializes writers; readers only touch `adapters`
    writer: Mutex<()>,
    primary: String,
    strict: AtomicBool,
    sink: Option<Arc<dyn EventSink>>,
}

impl DriverRegistry {
    pub fn new(primary: impl Into<String>, strict: bool) -> Self {
        Self::builder().primary(primary).strict(strict).build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::Acquire)
    }

    /// Toggle strict mode; takes effect for subsequent lookups
    pub fn set_strict(&self, strict: bool) {
        let previous = self.strict.swap(strict, Ordering::AcqRel);
        if previous != strict {
            tracing::info!(strict, "Registry strict mode changed");
        }
    }

    fn load(&self) -> Arc<AdapterMap> {
        Arc::clone(&self.adapters.read())
    }

    fn publish(&self, event: RegistryEvent) {
        if let Some(sink) = &self.sink {
            sink.publish(&event);
        }
    }

    /// Build adapters for `configs` and register them
    ///
    /// A backend that fails to build is logged and skipped, unless it is the
    /// primary backend in strict mode. In strict mode the primary backend
    /// must be registered once every configuration has been processed.
    pub async fn initialize<'a>(
        &self,
        configs: impl IntoIterator<Item = &'a BackendConfig>,
        converters: &ConverterChain,
    ) -> Result<()> {
        for config in configs {
            let built = match converters.convert(config).await {
                Ok(Some(adapter)) => Ok(adapter),
                Ok(None) => Err(Error::Config(format!(
                    "No adapter accepts backend '{}' of type '{}'",
                    config.name, config.backend_type
                ))),
                Err(e) => Err(e),
            };

            match built {
                Ok(adapter) => {
                    self.register(config.name.clone(), adapter);
                }
                Err(e) if self.is_strict() && config.name == self.primary => {
                    tracing::error!(backend = %config.name, error = %e, "Primary backend failed to build");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(backend = %config.name, error = %e, "Skipping backend");
                }
            }
        }

        let adapters = self.load();
        if adapters.contains_key(&self.primary) {
            tracing::info!(
                backends = adapters.len(),
                primary = %self.primary,
                "Backends initialized"
            );
            Ok(())
        } else if self.is_strict() {
            Err(Error::Config(format!(
                "Primary backend '{}' is not configured",
                self.primary
            )))
        } else {
            tracing::warn!(
                primary = %self.primary,
                "Primary backend is not configured; unrouted calls will fail"
            );
            Ok(())
        }
    }

    /// Build a registry from settings and initialize it
    pub async fn from_settings(settings: &Settings, converters: &ConverterChain) -> Result<Self> {
        let registry = RegistryBuilder::from_settings(settings).build();
        registry
            .initialize(settings.backends.values(), converters)
            .await?;
        Ok(registry)
    }

    /// Add an adapter under `name`
    ///
    /// Returns `false` and leaves the registry untouched if the name is taken.
    pub fn register(&self, name: impl Into<String>, adapter: Arc<dyn BackendAdapter>) -> bool {
        let name = name.into();
        {
            let _writer = self.writer.lock();
            let current = self.load();
            if current.contains_key(&name) {
                tracing::warn!(backend = %name, "Backend already registered");
                return false;
            }
            let mut next = AdapterMap::clone(&current);
            next.insert(name.clone(), adapter);
            *self.adapters.write() = Arc::new(next);
        }

        tracing::info!(backend = %name, "Registered backend");
        self.publish(RegistryEvent::added(name));
        true
    }

    /// Remove and close the adapter named `name`
    ///
    /// Returns `Ok(false)` if nothing was registered under the name. Removing
    /// an empty name, or the primary backend in strict mode, is rejected.
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(Error::DriverRemovalRejected(
                "backend name must not be empty".to_string(),
            ));
        }
        if self.is_strict() && name == self.primary {
            return Err(Error::DriverRemovalRejected(format!(
                "'{name}' is the primary backend and the registry is strict"
            )));
        }

        let removed = {
            let _writer = self.writer.lock();
            let current = self.load();
            if current.contains_key(name) {
                let mut next = AdapterMap::clone(&current);
                let adapter = next.remove(name);
                *self.adapters.write() = Arc::new(next);
                adapter
            } else {
                None
            }
        };

        let Some(adapter) = removed else {
            tracing::warn!(backend = name, "Backend is not registered");
            return Ok(false);
        };

        if let Err(e) = adapter.close().await {
            tracing::error!(backend = name, error = %e, "Failed to close backend");
        }
        tracing::info!(backend = name, "Unregistered backend");
        self.publish(RegistryEvent::removed(name));
        Ok(true)
    }

    /// Adapter for routing key `name`
    ///
    /// An empty key selects primary. Unknown keys fall back to primary unless
    /// the registry is strict.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BackendAdapter>> {
        let adapters = self.load();
        if name.is_empty() {
            return self.primary_of(&adapters);
        }
        if let Some(adapter) = adapters.get(name) {
            tracing::trace!(backend = name, "Resolved backend");
            return Ok(Arc::clone(adapter));
        }
        if self.is_strict() {
            return Err(Error::UnknownBackend(name.to_string()));
        }
        tracing::debug!(key = name, primary = %self.primary, "Unknown routing key, using primary");
        self.primary_of(&adapters)
    }

    fn primary_of(&self, adapters: &AdapterMap) -> Result<Arc<dyn BackendAdapter>> {
        adapters
            .get(&self.primary)
            .cloned()
            .ok_or_else(|| Error::UnknownBackend(self.primary.clone()))
    }

    /// Adapter selected by the current routing context
    pub fn current(&self) -> Result<Arc<dyn BackendAdapter>> {
        self.resolve(&context::peek())
    }

    /// Configuration of the currently selected adapter
    pub fn current_configuration(&self) -> Result<BackendConfig> {
        Ok(self.current()?.configuration().clone())
    }

    /// Exact lookup without primary fallback
    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.load().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.load().is_empty()
    }

    /// Registered names, sorted
    pub fn current_backends(&self) -> Vec<String> {
        self.load().keys().cloned().collect()
    }

    /// Point-in-time copy of the adapter map
    pub fn snapshot(&self) -> BTreeMap<String, Arc<dyn BackendAdapter>> {
        AdapterMap::clone(&self.load())
    }

    /// Remove every adapter and close each one, in name order
    ///
    /// Close failures are logged and collected; the remaining adapters are
    /// still closed.
    pub async fn shutdown(&self) -> ShutdownSummary {
        let drained = {
            let _writer = self.writer.lock();
            std::mem::take(&mut *self.adapters.write())
        };

        tracing::info!(backends = drained.len(), "Closing backends");
        let mut summary = ShutdownSummary::default();
        for (name, adapter) in drained.iter() {
            match adapter.close().await {
                Ok(()) => {
                    tracing::debug!(backend = %name, "Closed backend");
                    summary.closed.push(name.clone());
                }
                Err(e) => {
                    tracing::error!(backend = %name, error = %e, "Failed to close backend");
                    summary.failed.push((name.clone(), e));
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("primary", &self.primary)
            .field("strict", &self.is_strict())
            .field("backends", &self.current_backends())
            .finish()
    }
}

/// Builder for [`DriverRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    primary: Option<String>,
    strict: bool,
    sink: Option<Arc<dyn EventSink>>,
}

impl RegistryBuilder {
    /// Primary name and strictness taken from `settings`
    pub fn from_settings(settings: &Settings) -> Self {
        Self::default()
            .primary(settings.primary.clone())
            .strict(settings.strict)
    }

    pub fn primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = Some(primary.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            adapters: RwLock::new(Arc::new(AdapterMap::new())),
            writer: Mutex::new(()),
            primary: self
                .primary
                .unwrap_or_else(|| Settings::default().primary),
            strict: AtomicBool::new(self.strict),
            sink: self.sink,
        }
    }
}

/// The registry is itself an object store that forwards every operation to
/// the adapter selected by the current routing context.
#[async_trait]
impl ObjectStore for DriverRegistry {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: Option<u64>,
        content_type: Option<&str>,
    ) -> Result<ObjectInfo> {
        self.current()?
            .put_object(bucket, key, body, size, content_type)
            .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream> {
        self.current()?.get_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.current()?.delete_object(bucket, key).await
    }

    async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<ListPage> {
        self.current()?.list_objects(bucket, options).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.current()?.object_exists(bucket, key).await
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.current()?.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.current()?.create_bucket(bucket).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.current()?.delete_bucket(bucket).await
    }

    async fn set_acl(&self, bucket: &str, key: Option<&str>, acl: CannedAcl) -> Result<()> {
        self.current()?.set_acl(bucket, key, acl).await
    }

    async fn get_acl(&self, bucket: &str, key: Option<&str>) -> Result<AccessControlPolicy> {
        self.current()?.get_acl(bucket, key).await
    }

    async fn presign_url(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
    ) -> Result<String> {
        self.current()?.presign_url(bucket, key, method, ttl).await
    }
}
