//! Adapter converters
//!
//! A converter turns a [`BackendConfig`] into a live [`BackendAdapter`]. The
//! registry asks every converter in turn; the first one that claims the
//! configuration builds the adapter. A configuration can also name the
//! converter it needs through `adapter = "<name>"`, in which case only that
//! converter is consulted.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::credential::CredentialResolver;
use crate::error::{Error, Result};
use crate::traits::BackendAdapter;

#[async_trait]
pub trait AdapterConverter: Send + Sync {
    /// Name configurations use to demand this converter
    fn name(&self) -> &str;

    /// Build an adapter for `config`, or `Ok(None)` if the configuration is
    /// not for this converter
    async fn convert(
        &self,
        config: &BackendConfig,
        credentials: &CredentialResolver,
    ) -> Result<Option<Arc<dyn BackendAdapter>>>;
}

/// Ordered converters plus the credential resolver they share
#[derive(Default)]
pub struct ConverterChain {
    converters: Vec<Arc<dyn AdapterConverter>>,
    credentials: CredentialResolver,
}

impl ConverterChain {
    pub fn new(credentials: CredentialResolver) -> Self {
        Self {
            converters: Vec::new(),
            credentials,
        }
    }

    pub fn with(mut self, converter: impl AdapterConverter + 'static) -> Self {
        self.converters.push(Arc::new(converter));
        self
    }

    pub fn with_shared(mut self, converter: Arc<dyn AdapterConverter>) -> Self {
        self.converters.push(converter);
        self
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Build an adapter with the first converter that accepts `config`
    pub async fn convert(&self, config: &BackendConfig) -> Result<Option<Arc<dyn BackendAdapter>>> {
        if let Some(wanted) = config.adapter.as_deref() {
            let converter = self
                .converters
                .iter()
                .find(|c| c.name() == wanted)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Backend '{}' requires unknown adapter '{wanted}'",
                        config.name
                    ))
                })?;
            return converter.convert(config, &self.credentials).await;
        }

        for converter in &self.converters {
            if let Some(adapter) = converter.convert(config, &self.credentials).await? {
                tracing::debug!(
                    backend = %config.name,
                    converter = converter.name(),
                    "Adapter built"
                );
                return Ok(Some(adapter));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ConverterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.converters.iter().map(|c| c.name()).collect();
        f.debug_struct("ConverterChain")
            .field("converters", &names)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BACKEND_TYPE_MEMORY;
    use crate::memory::MemoryConverter;

    struct RejectAll;

    #[async_trait]
    impl AdapterConverter for RejectAll {
        fn name(&self) -> &str {
            "reject"
        }

        async fn convert(
            &self,
            _config: &BackendConfig,
            _credentials: &CredentialResolver,
        ) -> Result<Option<Arc<dyn BackendAdapter>>> {
            Ok(None)
        }
    }

    fn memory_config(name: &str) -> BackendConfig {
        BackendConfig::new(name, "memory://local", "ak", "sk").with_type(BACKEND_TYPE_MEMORY)
    }

    #[tokio::test]
    async fn test_first_accepting_converter_wins() {
        let chain = ConverterChain::default().with(RejectAll).with(MemoryConverter);
        let adapter = chain.convert(&memory_config("m1")).await.unwrap().unwrap();
        assert_eq!(adapter.name(), "m1");
    }

    #[tokio::test]
    async fn test_unclaimed_configuration() {
        let chain = ConverterChain::default().with(MemoryConverter);
        let config = BackendConfig::new("s3a", "http://localhost:9000", "ak", "sk");
        assert!(chain.convert(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_named_adapter_is_exclusive() {
        let chain = ConverterChain::default().with(MemoryConverter).with(RejectAll);

        let mut config = memory_config("m1");
        config.adapter = Some("reject".to_string());
        assert!(chain.convert(&config).await.unwrap().is_none());

        config.adapter = Some("missing".to_string());
        assert!(matches!(chain.convert(&config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_incomplete_configuration_is_an_error() {
        let chain = ConverterChain::default().with(MemoryConverter);
        let config = BackendConfig::new("m1", "memory://local", "", "sk").with_type(BACKEND_TYPE_MEMORY);
        assert!(matches!(
            chain.convert(&config).await,
            Err(Error::ConfigurationIncomplete { .. })
        ));
    }
}
