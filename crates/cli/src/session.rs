//! Per-invocation routing session
//!
//! Owns the driver registry built from the configuration file, the storage
//! client over it and the call interceptor. Every storage command runs its
//! work through [`Session::route`], so the `--backend` key (literal or
//! dynamic) decides which backend the command talks to.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dynstore_core::{
    CallInterceptor, ConfigManager, ConfigSource, ConverterChain, CredentialResolver,
    DriverRegistry, Invocation, MemoryConverter, Result, Settings, ShutdownSummary, StorageClient,
};
use dynstore_s3::S3Converter;

/// How to open a session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Configuration file; `DYNSTORE_CONFIG` or the default location when absent
    pub config: Option<PathBuf>,
    /// Routing key applied to every command; empty selects primary
    pub backend: String,
    /// Force strict routing regardless of the configuration
    pub strict: bool,
    /// `name=value` pairs exposed to `#header.<name>` keys
    pub headers: Vec<(String, String)>,
}

pub struct Session {
    registry: Arc<DriverRegistry>,
    client: StorageClient,
    interceptor: CallInterceptor,
    backend: String,
    headers: Vec<(String, String)>,
    health: bool,
}

impl Session {
    /// Load configuration and connect every configured backend
    pub async fn open(options: SessionOptions) -> Result<Self> {
        let manager = match &options.config {
            Some(path) => ConfigManager::with_path(path),
            None => ConfigManager::new()?,
        };
        let settings = manager.load()?;
        Self::from_settings(settings, options).await
    }

    pub async fn from_settings(mut settings: Settings, options: SessionOptions) -> Result<Self> {
        if options.strict {
            settings.strict = true;
        }

        let credentials = CredentialResolver::rsa(settings.public_key.clone());
        let converters = ConverterChain::new(credentials)
            .with(MemoryConverter)
            .with(S3Converter);
        let registry = DriverRegistry::from_settings(&settings, &converters).await?;

        let mut session = Self::new(Arc::new(registry), options.backend);
        session.headers = options.headers;
        session.health = settings.health;
        Ok(session)
    }

    /// Session over an already populated registry
    pub fn new(registry: Arc<DriverRegistry>, backend: impl Into<String>) -> Self {
        Self {
            client: StorageClient::new(Arc::clone(&registry)),
            registry,
            interceptor: CallInterceptor::standard(),
            backend: backend.into(),
            headers: Vec::new(),
            health: false,
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Whether the configuration asks for health probes when listing backends
    pub fn health_enabled(&self) -> bool {
        self.health
    }

    /// Call metadata for `command`, carrying the `--header` values
    pub fn invocation(&self, command: &str) -> Invocation {
        self.headers
            .iter()
            .fold(Invocation::new(command), |invocation, (name, value)| {
                invocation.header(name, value)
            })
    }

    /// Run `operation` routed by the session's backend key
    pub async fn route<F: Future>(&self, invocation: &Invocation, operation: F) -> F::Output {
        self.interceptor
            .invoke_with_key(&self.backend, invocation, operation)
            .await
    }

    /// Close every backend
    pub async fn close(self) -> ShutdownSummary {
        self.registry.shutdown().await
    }
}

/// Parse a `name=value` or `name:value` header argument
pub fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .or_else(|| raw.split_once(':'))
        .ok_or_else(|| format!("Invalid header '{raw}', expected NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid header '{raw}', name is empty"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use dynstore_core::BackendConfig;
    use dynstore_core::config::BACKEND_TYPE_MEMORY;

    /// Session over in-memory backends `s3a` (primary) and `s3b`, each with
    /// a `media` default bucket
    pub async fn memory_session(backend: &str, strict: bool) -> Session {
        let mut settings = Settings {
            primary: "s3a".to_string(),
            strict,
            ..Default::default()
        };
        for name in ["s3a", "s3b"] {
            let mut config = BackendConfig::new(name, "memory://local", "ak", "sk")
                .with_type(BACKEND_TYPE_MEMORY)
                .with_default_bucket("media");
            config.auto_create_bucket = true;
            settings.add_backend(config);
        }
        let options = SessionOptions {
            backend: backend.to_string(),
            ..Default::default()
        };
        Session::from_settings(settings, options).await.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::memory_session;
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("tenant=s3b").unwrap(),
            ("tenant".to_string(), "s3b".to_string())
        );
        assert_eq!(
            parse_header("x-tenant: archive").unwrap(),
            ("x-tenant".to_string(), "archive".to_string())
        );
        assert!(parse_header("novalue").is_err());
        assert!(parse_header("=s3b").is_err());
    }

    #[tokio::test]
    async fn test_route_uses_backend_key() {
        let session = memory_session("s3b", false).await;
        let invocation = session.invocation("ls");
        let name = session
            .route(&invocation, async { session.client().backend_name() })
            .await
            .unwrap();
        assert_eq!(name, "s3b");
    }

    #[tokio::test]
    async fn test_dynamic_key_from_header() {
        let mut session = memory_session("#header.tenant", false).await;
        session.headers = vec![("tenant".to_string(), "s3b".to_string())];
        let invocation = session.invocation("ls");
        let name = session
            .route(&invocation, async { session.client().backend_name() })
            .await
            .unwrap();
        assert_eq!(name, "s3b");
    }

    #[tokio::test]
    async fn test_strict_option_overrides_settings() {
        let settings = Settings {
            primary: "missing".to_string(),
            ..Default::default()
        };
        let options = SessionOptions {
            strict: true,
            ..Default::default()
        };
        assert!(Session::from_settings(settings, options).await.is_err());
    }

    #[tokio::test]
    async fn test_close_shuts_registry_down() {
        let session = memory_session("", false).await;
        let summary = session.close().await;
        assert_eq!(summary.closed, vec!["s3a", "s3b"]);
    }
}
