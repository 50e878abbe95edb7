//! dyns - command-line client for dynamically routed object storage
//!
//! Every storage command runs against the backend selected by `--backend`.
//! The key is either a backend name or a `#` expression resolved per call,
//! e.g. `#bucket` or `#header.x-tenant`.

mod commands;
mod exit_code;
mod output;
mod session;

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use commands::Commands;
use exit_code::ExitCode;
use output::{Formatter, OutputConfig};
use session::{Session, SessionOptions};

/// Dynamic routing across object storage backends
#[derive(Parser, Debug)]
#[command(name = "dyns", version, about, propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct GlobalOptions {
    /// Configuration file
    #[arg(long, global = true, env = "DYNSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Routing key: a backend name or a `#` expression; empty selects primary
    #[arg(short, long, global = true, env = "DYNSTORE_BACKEND", default_value = "")]
    backend: String,

    /// Reject unknown backend keys instead of falling back to primary
    #[arg(long, global = true)]
    strict: bool,

    /// Header visible to `#header.<name>` keys (NAME=VALUE, repeatable)
    #[arg(short = 'H', long = "header", global = true, value_parser = session::parse_header)]
    headers: Vec<(String, String)>,

    /// Output JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colors
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging to stderr
    #[arg(long, global = true)]
    debug: bool,
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    let filter = if debug {
        EnvFilter::new("dynstore_core=debug,dynstore_s3=debug,dynstore_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

async fn run(cli: Cli, formatter: &Formatter) -> ExitCode {
    if let Commands::Completions(args) = &cli.command {
        return commands::completions::execute(args, &mut Cli::command());
    }

    let options = SessionOptions {
        config: cli.global.config,
        backend: cli.global.backend,
        strict: cli.global.strict,
        headers: cli.global.headers,
    };
    let session = match Session::open(options).await {
        Ok(session) => session,
        Err(e) => {
            formatter.error(&format!("Failed to initialize backends: {e}"));
            return ExitCode::from_error(&e);
        }
    };

    let code = commands::execute(cli.command, &session, formatter).await;

    let summary = session.close().await;
    for (name, error) in &summary.failed {
        formatter.warning(&format!("Failed to close backend '{name}': {error}"));
    }
    tracing::debug!(closed = summary.closed.len(), "Session closed");

    code
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.global.debug) {
        eprintln!("{e:#}");
    }

    let formatter = Formatter::new(OutputConfig {
        json: cli.global.json,
        no_color: cli.global.no_color,
        quiet: cli.global.quiet,
    });

    run(cli, &formatter).await.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_options() {
        let cli = Cli::try_parse_from([
            "dyns",
            "--backend",
            "#header.x-tenant",
            "-H",
            "x-tenant=s3b",
            "--strict",
            "ls",
            "media",
        ])
        .unwrap();
        assert_eq!(cli.global.backend, "#header.x-tenant");
        assert_eq!(
            cli.global.headers,
            vec![("x-tenant".to_string(), "s3b".to_string())]
        );
        assert!(cli.global.strict);
        assert!(matches!(cli.command, Commands::Ls(ref args) if args.bucket.as_deref() == Some("media")));
    }

    #[test]
    fn test_parse_share_method() {
        let cli = Cli::try_parse_from(["dyns", "share", "a.txt", "--method", "put", "-e", "1h"]).unwrap();
        match cli.command {
            Commands::Share(args) => {
                assert_eq!(args.method, dynstore_core::PresignMethod::Put);
                assert_eq!(args.expire, "1h");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
