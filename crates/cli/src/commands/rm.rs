//! rm command - Remove objects
//!
//! Removes each key in turn and keeps going after a failure; the exit code
//! reflects the first failure.

use clap::Args;
use dynstore_core::Error;
use serde::Serialize;

use super::report;
use crate::exit_code::ExitCode;
use crate::output::Formatter;
use crate::session::Session;

/// Remove objects
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object keys to remove
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Bucket; the backend's default bucket when omitted
    #[arg(long)]
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
struct RmOutput {
    backend: String,
    bucket: String,
    deleted: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed: Vec<Failure>,
}

#[derive(Debug, Serialize)]
struct Failure {
    key: String,
    error: String,
}

pub async fn execute(args: RmArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session
        .invocation("rm")
        .arg("keys", args.keys.clone())
        .arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;

            let mut outcomes = Vec::with_capacity(args.keys.len());
            for key in &args.keys {
                outcomes.push((key.clone(), client.remove(Some(&bucket), key).await));
            }
            Ok::<_, Error>((backend, bucket, outcomes))
        })
        .await;

    let (backend, bucket, outcomes) = match result {
        Ok(done) => done,
        Err(e) => return report(formatter, "Failed to remove objects", &e),
    };

    let mut code = ExitCode::Success;
    let mut output = RmOutput {
        backend,
        bucket,
        deleted: Vec::new(),
        failed: Vec::new(),
    };
    for (key, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                formatter.success(&format!(
                    "Removed {}:{}/{key}",
                    output.backend, output.bucket
                ));
                output.deleted.push(key);
            }
            Err(e) => {
                let failure = report(formatter, &format!("Failed to remove '{key}'"), &e);
                if code == ExitCode::Success {
                    code = failure;
                }
                output.failed.push(Failure {
                    key,
                    error: e.to_string(),
                });
            }
        }
    }

    if formatter.is_json() {
        formatter.json(&output);
    }
    code
}
