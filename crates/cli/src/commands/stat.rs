//! stat command - Show object metadata

use clap::Args;
use dynstore_core::{Error, ObjectInfo};
use serde::Serialize;

use super::{format_size, format_timestamp, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// Show object metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Object key
    pub key: String,

    /// Bucket; the backend's default bucket when omitted
    #[arg(long)]
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    backend: String,
    bucket: String,
    #[serde(flatten)]
    object: ObjectInfo,
}

pub async fn execute(args: StatArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session
        .invocation("stat")
        .arg("key", args.key.clone())
        .arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;
            let object = client.stat(Some(&bucket), &args.key).await?;
            Ok::<_, Error>(StatOutput {
                backend,
                bucket,
                object,
            })
        })
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => return report(formatter, &format!("Failed to stat '{}'", args.key), &e),
    };

    if formatter.is_json() {
        formatter.json(&output);
        return ExitCode::Success;
    }

    let object = &output.object;
    let size = object.size_bytes.unwrap_or(0).max(0) as u64;
    let rows = [
        ("Backend", formatter.paint(Paint::Name, &output.backend)),
        ("Bucket", output.bucket.clone()),
        ("Key", formatter.paint(Paint::Object, &object.key)),
        (
            "Size",
            formatter.paint(Paint::Size, &format!("{} ({size} bytes)", format_size(size))),
        ),
        (
            "Modified",
            formatter.paint(Paint::Timestamp, &format_timestamp(object.last_modified)),
        ),
        ("ETag", object.etag.clone().unwrap_or_default()),
        ("Type", object.content_type.clone().unwrap_or_default()),
    ];
    for (name, value) in rows {
        formatter.println(&format!("{} {value}", formatter.paint(Paint::Label, &format!("{name:<9}"))));
    }

    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use crate::session::testing::memory_session;

    fn quiet() -> Formatter {
        Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_stat_existing_and_missing() {
        let session = memory_session("", false).await;
        session
            .client()
            .upload(None, "a.txt", "hello", Some("text/plain"))
            .await
            .unwrap();

        let args = StatArgs {
            key: "a.txt".to_string(),
            bucket: None,
        };
        assert_eq!(execute(args, &session, &quiet()).await, ExitCode::Success);

        let args = StatArgs {
            key: "b.txt".to_string(),
            bucket: None,
        };
        assert_eq!(execute(args, &session, &quiet()).await, ExitCode::NotFound);
    }
}
