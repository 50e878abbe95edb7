//! mb / rb commands - Create and remove buckets

use clap::Args;
use dynstore_core::Error;
use serde::Serialize;

use super::report;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// Create a bucket
#[derive(Args, Debug)]
pub struct MbArgs {
    /// Bucket name; the backend's default bucket when omitted
    pub bucket: Option<String>,

    /// Succeed when the bucket already exists
    #[arg(long)]
    pub ignore_existing: bool,
}

/// Remove an empty bucket
#[derive(Args, Debug)]
pub struct RbArgs {
    /// Bucket name; the backend's default bucket when omitted
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
struct BucketOutput {
    backend: String,
    bucket: String,
    action: &'static str,
}

pub async fn execute_mb(args: MbArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session.invocation("mb").arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;
            let action = if args.ignore_existing && client.bucket_exists(Some(&bucket)).await? {
                "exists"
            } else {
                client.create_bucket(Some(&bucket)).await?;
                "created"
            };
            Ok::<_, Error>(BucketOutput {
                backend,
                bucket,
                action,
            })
        })
        .await;

    match result {
        Ok(output) => {
            if formatter.is_json() {
                formatter.json(&output);
            } else if output.action == "exists" {
                formatter.success(&format!(
                    "Bucket {}:{} already exists",
                    output.backend,
                    formatter.paint(Paint::Name, &output.bucket)
                ));
            } else {
                formatter.success(&format!(
                    "Created bucket {}:{}",
                    output.backend,
                    formatter.paint(Paint::Name, &output.bucket)
                ));
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, "Failed to create bucket", &e),
    }
}

pub async fn execute_rb(args: RbArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session.invocation("rb").arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.delete_bucket(args.bucket.as_deref()).await?;
            Ok::<_, Error>(BucketOutput {
                backend,
                bucket,
                action: "removed",
            })
        })
        .await;

    match result {
        Ok(output) => {
            if formatter.is_json() {
                formatter.json(&output);
            } else {
                formatter.success(&format!(
                    "Removed bucket {}:{}",
                    output.backend,
                    formatter.paint(Paint::Name, &output.bucket)
                ));
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, "Failed to remove bucket", &e),
    }
}
