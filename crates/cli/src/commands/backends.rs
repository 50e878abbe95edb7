//! backends command - List configured backends
//!
//! Shows every registered backend with its endpoint and default bucket.
//! With `--health` (or `health = true` in the configuration) each backend
//! is probed and the command fails when any probe fails.

use std::time::Duration;

use clap::Args;
use dynstore_core::{BackendAdapter, HealthChecker, HealthReport, HealthStatus};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// List configured backends
#[derive(Args, Debug)]
pub struct BackendsArgs {
    /// Probe each backend
    #[arg(long)]
    pub health: bool,

    /// Probe timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
struct BackendInfo {
    name: String,
    backend_type: String,
    endpoint: String,
    region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_bucket: Option<String>,
    primary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<HealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct BackendsOutput {
    primary: String,
    strict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<HealthStatus>,
    backends: Vec<BackendInfo>,
}

fn describe(session: &Session, report: Option<&HealthReport>) -> BackendsOutput {
    let registry = session.registry();
    let backends = registry
        .snapshot()
        .into_iter()
        .map(|(name, adapter)| {
            let config = adapter.configuration();
            let health = report.and_then(|report| report.backend(&name));
            BackendInfo {
                primary: name == registry.primary(),
                backend_type: config.backend_type.clone(),
                endpoint: config.endpoint.clone(),
                region: config.region.clone(),
                default_bucket: config.default_bucket.clone(),
                status: health.map(|h| h.status),
                latency_ms: health.map(|h| h.latency_ms),
                error: health.and_then(|h| h.error.clone()),
                name,
            }
        })
        .collect();

    BackendsOutput {
        primary: registry.primary().to_string(),
        strict: registry.is_strict(),
        status: report.map(|report| report.status),
        backends,
    }
}

pub async fn execute(args: BackendsArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let report = if args.health || session.health_enabled() {
        let checker = HealthChecker::new(Duration::from_secs(args.timeout));
        Some(checker.check(session.registry()).await)
    } else {
        None
    };
    let output = describe(session, report.as_ref());

    let code = match output.status {
        Some(HealthStatus::Down) => ExitCode::NetworkError,
        _ => ExitCode::Success,
    };

    if formatter.is_json() {
        formatter.json(&output);
        return code;
    }

    if output.backends.is_empty() {
        formatter.warning("No backends registered");
        return code;
    }

    let mut header = vec!["NAME", "TYPE", "ENDPOINT", "DEFAULT BUCKET", "PRIMARY"];
    if report.is_some() {
        header.extend(["STATUS", "LATENCY"]);
    }
    let mut table = formatter.table(&header);
    for backend in &output.backends {
        let mut row = vec![
            formatter.paint(Paint::Name, &backend.name),
            backend.backend_type.clone(),
            formatter.paint(Paint::Url, &backend.endpoint),
            backend.default_bucket.clone().unwrap_or_else(|| "-".to_string()),
            if backend.primary { "*".to_string() } else { String::new() },
        ];
        if let Some(status) = backend.status {
            row.push(formatter.paint_status(&status.to_string(), status == HealthStatus::Up));
            row.push(format!("{}ms", backend.latency_ms.unwrap_or(0)));
        }
        table.add_row(row);
    }
    formatter.print_table(&table);

    for backend in &output.backends {
        if let Some(error) = &backend.error {
            formatter.warning(&format!("{}: {error}", backend.name));
        }
    }
    if output.strict {
        formatter.println("Strict routing: unknown backend keys are rejected");
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use crate::session::testing::memory_session;

    #[tokio::test]
    async fn test_describe_marks_primary() {
        let session = memory_session("", true).await;
        let output = describe(&session, None);

        assert_eq!(output.primary, "s3a");
        assert!(output.strict);
        let names: Vec<_> = output.backends.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["s3a", "s3b"]);
        assert!(output.backends[0].primary);
        assert!(!output.backends[1].primary);
        assert_eq!(output.backends[1].default_bucket.as_deref(), Some("media"));
        assert!(output.backends[0].status.is_none());
    }

    #[tokio::test]
    async fn test_health_probe() {
        let session = memory_session("", false).await;
        let formatter = Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        });
        let args = BackendsArgs {
            health: true,
            timeout: 5,
        };
        assert_eq!(execute(args, &session, &formatter).await, ExitCode::Success);

        session.registry().get("s3b").unwrap().close().await.unwrap();
        let args = BackendsArgs {
            health: true,
            timeout: 5,
        };
        assert_eq!(execute(args, &session, &formatter).await, ExitCode::NetworkError);
    }
}
