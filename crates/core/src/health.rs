//! Backend health reporting
//!
//! Probes every registered adapter concurrently and reports one entry per
//! backend. A probe that exceeds the timeout counts as down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;

use crate::registry::DriverRegistry;
use crate::traits::BackendAdapter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Up => write!(f, "UP"),
            HealthStatus::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub backend_type: String,
    pub status: HealthStatus,
    pub primary: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `Up` only when every backend is up
    pub status: HealthStatus,
    pub backends: Vec<BackendHealth>,
}

impl HealthReport {
    pub fn backend(&self, name: &str) -> Option<&BackendHealth> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Runs health probes against a registry
#[derive(Debug, Clone, Copy)]
pub struct HealthChecker {
    timeout: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn check(&self, registry: &DriverRegistry) -> HealthReport {
        let primary = registry.primary().to_string();
        let probes = registry
            .snapshot()
            .into_iter()
            .map(|(name, adapter)| self.probe(name, adapter, &primary));
        let backends = join_all(probes).await;

        let status = if backends.iter().all(|b| b.status == HealthStatus::Up) {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        };
        HealthReport { status, backends }
    }

    async fn probe(&self, name: String, adapter: Arc<dyn BackendAdapter>, primary: &str) -> BackendHealth {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, adapter.health_check()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("Health check timed out after {:?}", self.timeout)),
        };
        if let Some(error) = &error {
            tracing::warn!(backend = %name, error = %error, "Backend health check failed");
        }

        BackendHealth {
            primary: name == primary,
            backend_type: adapter.configuration().backend_type.clone(),
            status: if error.is_none() {
                HealthStatus::Up
            } else {
                HealthStatus::Down
            },
            name,
            latency_ms,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BACKEND_TYPE_MEMORY, BackendConfig};
    use crate::memory::MemoryAdapter;

    fn memory(name: &str) -> Arc<MemoryAdapter> {
        let config = BackendConfig::new(name, "memory://local", "ak", "sk").with_type(BACKEND_TYPE_MEMORY);
        Arc::new(MemoryAdapter::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_all_up() {
        let registry = DriverRegistry::new("s3a", false);
        registry.register("s3a", memory("s3a"));
        registry.register("s3b", memory("s3b"));

        let report = HealthChecker::default().check(&registry).await;
        assert_eq!(report.status, HealthStatus::Up);
        assert_eq!(report.backends.len(), 2);
        assert!(report.backend("s3a").unwrap().primary);
        assert!(!report.backend("s3b").unwrap().primary);
        assert_eq!(report.backend("s3b").unwrap().backend_type, "memory");
    }

    #[tokio::test]
    async fn test_closed_backend_is_down() {
        let registry = DriverRegistry::new("s3a", false);
        let s3b = memory("s3b");
        registry.register("s3a", memory("s3a"));
        registry.register("s3b", s3b.clone());
        s3b.close().await.unwrap();

        let report = HealthChecker::new(Duration::from_secs(1)).check(&registry).await;
        assert_eq!(report.status, HealthStatus::Down);
        let s3b = report.backend("s3b").unwrap();
        assert_eq!(s3b.status, HealthStatus::Down);
        assert!(s3b.error.is_some());
        assert_eq!(report.backend("s3a").unwrap().status, HealthStatus::Up);
    }

    #[tokio::test]
    async fn test_empty_registry_is_up() {
        let registry = DriverRegistry::new("s3a", false);
        let report = HealthChecker::default().check(&registry).await;
        assert_eq!(report.status, HealthStatus::Up);
        assert!(report.backends.is_empty());
    }
}
