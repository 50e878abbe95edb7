//! Configuration management
//!
//! Backends are described in a TOML file:
//!
//! ```toml
//! primary = "s3a"
//! strict = false
//!
//! [backends.s3a]
//! endpoint = "http://localhost:9000"
//! access_key = "minioadmin"
//! secret_key = "ENC(...)"
//! default_bucket = "media"
//! ```
//!
//! The file location defaults to `<config dir>/dynstore/config.toml` and can
//! be overridden with the `DYNSTORE_CONFIG` environment variable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::{Error, Result};

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "DYNSTORE_CONFIG";

/// Backend type handled by the built-in S3 adapter
pub const BACKEND_TYPE_S3: &str = "s3";

/// Backend type handled by the in-memory adapter
pub const BACKEND_TYPE_MEMORY: &str = "memory";

fn default_backend_type() -> String {
    BACKEND_TYPE_S3.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_primary() -> String {
    BACKEND_TYPE_S3.to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration of one named backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend name; filled in from the table key when loaded from a file
    #[serde(default, skip_serializing)]
    pub name: String,

    /// Backend type, used by adapter converters to claim the configuration
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub access_key: Credential,

    #[serde(default)]
    pub secret_key: Credential,

    /// Path-style bucket addressing
    #[serde(default = "default_true")]
    pub path_style: bool,

    /// Bucket used when an operation names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_bucket: Option<String>,

    /// Create `default_bucket` when the adapter is built
    #[serde(default)]
    pub auto_create_bucket: bool,

    /// Name of a registered converter that must build this backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Name of a registered decryptor for this backend's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryptor: Option<String>,

    /// Public key for `ENC(...)` credentials, overriding the global one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl BackendConfig {
    /// Create an S3 backend configuration with default settings
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend_type: default_backend_type(),
            endpoint: endpoint.into(),
            region: default_region(),
            access_key: Credential::new(access_key),
            secret_key: Credential::new(secret_key),
            path_style: true,
            default_bucket: None,
            auto_create_bucket: false,
            adapter: None,
            decryptor: None,
            public_key: None,
        }
    }

    pub fn with_type(mut self, backend_type: impl Into<String>) -> Self {
        self.backend_type = backend_type.into();
        self
    }

    pub fn with_default_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.default_bucket = Some(bucket.into());
        self
    }

    /// Fail closed unless access key, secret key and endpoint are all present
    pub fn pre_check(&self) -> Result<()> {
        let missing = if self.access_key.is_empty() {
            Some("access_key")
        } else if self.secret_key.is_empty() {
            Some("secret_key")
        } else if self.endpoint.trim().is_empty() {
            Some("endpoint")
        } else {
            None
        };

        match missing {
            Some(field) => Err(Error::ConfigurationIncomplete {
                backend: self.name.clone(),
                field,
            }),
            None => Ok(()),
        }
    }

    /// Parse the endpoint as a URL
    pub fn endpoint_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.endpoint).map_err(|e| {
            Error::Config(format!(
                "Invalid endpoint '{}' for backend '{}': {e}",
                self.endpoint, self.name
            ))
        })
    }
}

/// Top-level routing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Backend used when no routing key is given or the key is unknown
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Unknown routing keys are errors instead of falling back to primary
    #[serde(default)]
    pub strict: bool,

    /// Probe backends when listing them
    #[serde(default)]
    pub health: bool,

    /// Global public key for `ENC(...)` credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            strict: false,
            health: false,
            public_key: None,
            backends: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Copy table keys into each backend's `name`
    pub fn normalize(mut self) -> Self {
        for (name, backend) in self.backends.iter_mut() {
            backend.name = name.clone();
        }
        self
    }

    pub fn add_backend(&mut self, backend: BackendConfig) {
        self.backends.insert(backend.name.clone(), backend);
    }
}

/// Supplies backend configuration once, before the registry is initialized
pub trait ConfigSource {
    fn load(&self) -> Result<Settings>;
}

/// In-memory configuration source
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    settings: Settings,
}

impl StaticConfigSource {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Settings> {
        Ok(self.settings.clone().normalize())
    }
}

/// Reads and writes the TOML configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Use `DYNSTORE_CONFIG` or the default location
    pub fn new() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.is_empty()
        {
            return Ok(Self::with_path(path));
        }

        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot determine config directory".to_string()))?;
        Ok(Self::with_path(dir.join("dynstore").join("config.toml")))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file is a configuration error
    pub fn load_settings(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Err(Error::Config(format!(
                "Configuration file not found: {}",
                self.path.display()
            )));
        }

        let content = std::fs::read_to_string(&self.path)?;
        let settings: Settings = toml::from_str(&content)?;
        tracing::debug!(
            path = %self.path.display(),
            backends = settings.backends.len(),
            "Loaded configuration"
        );
        Ok(settings.normalize())
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ConfigSource for ConfigManager {
    fn load(&self) -> Result<Settings> {
        self.load_settings()
    }
}
