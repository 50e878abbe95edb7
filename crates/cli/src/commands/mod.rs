//! Command implementations
//!
//! Storage commands route through the session, so `--backend` selects the
//! backend for the whole command. Each command returns the process exit code.

pub mod acl;
pub mod backends;
pub mod bucket;
pub mod completions;
pub mod get;
pub mod ls;
pub mod put;
pub mod rm;
pub mod share;
pub mod stat;

use clap::Subcommand;
use dynstore_core::Error;
use jiff::Timestamp;

use crate::exit_code::ExitCode;
use crate::output::Formatter;
use crate::session::Session;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured backends
    Backends(backends::BackendsArgs),

    /// List objects in a bucket
    Ls(ls::LsArgs),

    /// Download an object
    Get(get::GetArgs),

    /// Upload a file
    Put(put::PutArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// Show object metadata
    Stat(stat::StatArgs),

    /// Create a bucket
    Mb(bucket::MbArgs),

    /// Remove an empty bucket
    Rb(bucket::RbArgs),

    /// Inspect or change access control lists
    #[command(subcommand)]
    Acl(acl::AclCommands),

    /// Generate a presigned URL
    Share(share::ShareArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Run a command that needs backends
pub async fn execute(command: Commands, session: &Session, formatter: &Formatter) -> ExitCode {
    match command {
        Commands::Backends(args) => backends::execute(args, session, formatter).await,
        Commands::Ls(args) => ls::execute(args, session, formatter).await,
        Commands::Get(args) => get::execute(args, session, formatter).await,
        Commands::Put(args) => put::execute(args, session, formatter).await,
        Commands::Rm(args) => rm::execute(args, session, formatter).await,
        Commands::Stat(args) => stat::execute(args, session, formatter).await,
        Commands::Mb(args) => bucket::execute_mb(args, session, formatter).await,
        Commands::Rb(args) => bucket::execute_rb(args, session, formatter).await,
        Commands::Acl(cmd) => acl::execute(cmd, session, formatter).await,
        Commands::Share(args) => share::execute(args, session, formatter).await,
        Commands::Completions(_) => {
            formatter.error("Completions do not need backends; run them without a session");
            ExitCode::UsageError
        }
    }
}

/// Print `error` with some context and map it to an exit code
pub(crate) fn report(formatter: &Formatter, context: &str, error: &Error) -> ExitCode {
    formatter.error(&format!("{context}: {error}"));
    ExitCode::from_error(error)
}

pub(crate) fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

pub(crate) fn format_timestamp(timestamp: Option<Timestamp>) -> String {
    timestamp
        .map(|ts| ts.strftime("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}
