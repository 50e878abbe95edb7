//! ls command - List objects in a bucket
//!
//! Lists the routed backend's default bucket unless a bucket is given.
//! Entries are grouped by `/` unless `--recursive` is set.

use clap::Args;
use dynstore_core::{Error, ListOptions, ObjectInfo};
use serde::Serialize;

use super::{format_size, format_timestamp, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// List objects in a bucket
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Bucket to list; the backend's default bucket when omitted
    pub bucket: Option<String>,

    /// Only list keys starting with this prefix
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// List everything below the prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Return a single page of at most this many entries
    #[arg(long)]
    pub max_keys: Option<i32>,
}

#[derive(Debug, Serialize)]
struct LsOutput {
    backend: String,
    bucket: String,
    items: Vec<ObjectInfo>,
    truncated: bool,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct Summary {
    total_objects: usize,
    total_size_bytes: i64,
    total_size_human: String,
}

impl LsOutput {
    fn new(backend: String, bucket: String, items: Vec<ObjectInfo>, truncated: bool) -> Self {
        let files = items.iter().filter(|item| !item.is_dir);
        let total_size_bytes: i64 = files.clone().filter_map(|item| item.size_bytes).sum();
        let summary = Summary {
            total_objects: files.count(),
            total_size_bytes,
            total_size_human: format_size(total_size_bytes.max(0) as u64),
        };
        Self {
            backend,
            bucket,
            items,
            truncated,
            summary,
        }
    }
}

pub async fn execute(args: LsArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session
        .invocation("ls")
        .arg("bucket", args.bucket.clone())
        .arg("prefix", args.prefix.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;
            let options = ListOptions {
                prefix: args.prefix.clone(),
                max_keys: args.max_keys,
                continuation_token: None,
                recursive: args.recursive,
            };

            let (items, truncated) = if args.max_keys.is_some() {
                let page = client.list(Some(&bucket), options).await?;
                (page.items, page.truncated)
            } else {
                (client.list_all(Some(&bucket), options).await?, false)
            };
            Ok::<_, Error>(LsOutput::new(backend, bucket, items, truncated))
        })
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => return report(formatter, "Failed to list objects", &e),
    };

    if formatter.is_json() {
        formatter.json(&output);
        return ExitCode::Success;
    }

    for item in &output.items {
        let date = formatter.paint(Paint::Timestamp, &format!("{:>19}", format_timestamp(item.last_modified)));
        if item.is_dir {
            let size = formatter.paint(Paint::Size, &format!("{:>10}", "0B"));
            formatter.println(&format!("[{date}] {size} {}", formatter.paint(Paint::Prefix, &item.key)));
        } else {
            let size = format_size(item.size_bytes.unwrap_or(0).max(0) as u64);
            let size = formatter.paint(Paint::Size, &format!("{size:>10}"));
            formatter.println(&format!("[{date}] {size} {}", formatter.paint(Paint::Object, &item.key)));
        }
    }

    let location = formatter.paint(Paint::Name, &format!("{}:{}", output.backend, output.bucket));
    let more = if output.truncated { " (truncated)" } else { "" };
    formatter.println(&format!(
        "\n{location}: {} objects, {}{more}",
        output.summary.total_objects, output.summary.total_size_human
    ));

    ExitCode::Success
}
