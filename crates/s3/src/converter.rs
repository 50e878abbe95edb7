//! Converter building S3 adapters from backend configuration

use std::sync::Arc;

use async_trait::async_trait;
use dynstore_core::config::BACKEND_TYPE_S3;
use dynstore_core::{AdapterConverter, BackendAdapter, BackendConfig, CredentialResolver, Result};

use crate::client::S3Adapter;

/// Builds [`S3Adapter`]s for backends of type `s3`
#[derive(Debug, Default, Clone, Copy)]
pub struct S3Converter;

#[async_trait]
impl AdapterConverter for S3Converter {
    fn name(&self) -> &str {
        BACKEND_TYPE_S3
    }

    async fn convert(
        &self,
        config: &BackendConfig,
        credentials: &CredentialResolver,
    ) -> Result<Option<Arc<dyn BackendAdapter>>> {
        if config.backend_type != BACKEND_TYPE_S3 {
            return Ok(None);
        }
        let adapter = S3Adapter::connect(config.clone(), credentials).await?;
        Ok(Some(Arc::new(adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynstore_core::config::BACKEND_TYPE_MEMORY;
    use dynstore_core::{ConverterChain, Error, MemoryConverter};

    #[tokio::test]
    async fn test_claims_only_s3_backends() {
        let config = BackendConfig::new("scratch", "memory://local", "ak", "sk")
            .with_type(BACKEND_TYPE_MEMORY);
        let result = S3Converter
            .convert(&config, &CredentialResolver::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_chain_builds_both_kinds() {
        let chain = ConverterChain::default().with(MemoryConverter).with(S3Converter);

        let s3 = chain
            .convert(&BackendConfig::new("s3a", "http://localhost:9000", "ak", "sk"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s3.name(), "s3a");
        assert_eq!(s3.configuration().backend_type, "s3");

        let memory = chain
            .convert(
                &BackendConfig::new("scratch", "memory://local", "ak", "sk")
                    .with_type(BACKEND_TYPE_MEMORY),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(memory.name(), "scratch");
    }

    #[tokio::test]
    async fn test_incomplete_s3_backend_fails() {
        let config = BackendConfig::new("s3a", "", "ak", "sk");
        let result = S3Converter
            .convert(&config, &CredentialResolver::default())
            .await;
        assert!(matches!(
            result,
            Err(Error::ConfigurationIncomplete { field: "endpoint", .. })
        ));
    }
}
