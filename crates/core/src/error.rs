//! Error types for dynstore-core
//!
//! Every fallible operation in the routing core and in the backend adapters
//! returns [`Result`], so callers can match on the routing-specific variants
//! (`UnknownBackend`, `DriverRemovalRejected`, ...) without downcasting.

use thiserror::Error;

/// Result type alias for dynstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for dynstore operations
#[derive(Debug, Error)]
pub enum Error {
    /// A backend configuration lacks a field required to build an adapter
    #[error("Configuration incomplete for backend '{backend}': missing {field}")]
    ConfigurationIncomplete { backend: String, field: &'static str },

    /// A routing key matched no registered adapter (strict mode only)
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Transport or SDK failure during a delegated operation
    #[error("Backend operation failed: {0}")]
    BackendOperationFailed(String),

    /// Attempt to remove the primary adapter in strict mode, or an empty name
    #[error("Driver removal rejected: {0}")]
    DriverRemovalRejected(String),

    /// Object or bucket does not exist on the selected backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not offered by the selected backend
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Process exit code a command line front end should report
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigurationIncomplete { .. }
            | Error::Config(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => 2,
            Error::BackendOperationFailed(_) => 3,
            Error::NotFound(_) => 5,
            Error::UnknownBackend(_) | Error::DriverRemovalRejected(_) => 6,
            Error::UnsupportedFeature(_) => 7,
            Error::Io(_) | Error::General(_) => 1,
        }
    }

    /// Whether the error came from the routing layer rather than a backend
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownBackend(_) | Error::DriverRemovalRejected(_)
        )
    }
}
