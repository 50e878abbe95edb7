//! put command - Upload a file

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use dynstore_core::{Error, ObjectInfo};
use serde::Serialize;

use super::{format_size, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// Upload a file
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local file to upload
    pub file: PathBuf,

    /// Object key; defaults to the file name
    pub key: Option<String>,

    /// Bucket; the backend's default bucket when omitted
    #[arg(long)]
    pub bucket: Option<String>,

    /// Content type; guessed from the file extension when omitted
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    backend: String,
    bucket: String,
    #[serde(flatten)]
    object: ObjectInfo,
}

fn object_key(args: &PutArgs) -> Option<String> {
    args.key.clone().or_else(|| {
        args.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    })
}

fn content_type(args: &PutArgs) -> Option<String> {
    args.content_type.clone().or_else(|| {
        mime_guess::from_path(&args.file)
            .first_raw()
            .map(str::to_string)
    })
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

pub async fn execute(args: PutArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let Some(key) = object_key(&args) else {
        formatter.error(&format!(
            "Cannot derive an object key from '{}'",
            args.file.display()
        ));
        return ExitCode::UsageError;
    };

    let data = match read_file(&args.file).await {
        Ok(data) => data,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::GeneralError;
        }
    };
    let content_type = content_type(&args);

    let invocation = session
        .invocation("put")
        .arg("key", key.clone())
        .arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;
            let object = client
                .upload(Some(&bucket), &key, data, content_type.as_deref())
                .await?;
            Ok::<_, Error>(PutOutput {
                backend,
                bucket,
                object,
            })
        })
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => return report(formatter, &format!("Failed to upload '{key}'"), &e),
    };

    if formatter.is_json() {
        formatter.json(&output);
    } else {
        let size = output.object.size_bytes.unwrap_or(0).max(0) as u64;
        formatter.success(&format!(
            "Uploaded {} -> {}:{}/{} ({})",
            formatter.paint(Paint::Object, &args.file.display().to_string()),
            output.backend,
            output.bucket,
            output.object.key,
            formatter.paint(Paint::Size, &format_size(size))
        ));
    }

    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use crate::session::testing::memory_session;
    use tempfile::TempDir;

    fn quiet() -> Formatter {
        Formatter::new(OutputConfig {
            quiet: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_key_and_content_type_defaults() {
        let args = PutArgs {
            file: PathBuf::from("/tmp/report.json"),
            key: None,
            bucket: None,
            content_type: None,
        };
        assert_eq!(object_key(&args).as_deref(), Some("report.json"));
        assert_eq!(content_type(&args).as_deref(), Some("application/json"));

        let args = PutArgs {
            key: Some("custom/key".to_string()),
            content_type: Some("text/plain".to_string()),
            ..args
        };
        assert_eq!(object_key(&args).as_deref(), Some("custom/key"));
        assert_eq!(content_type(&args).as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_put_routes_to_selected_backend() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        let session = memory_session("s3b", false).await;
        let args = PutArgs {
            file,
            key: None,
            bucket: None,
            content_type: None,
        };
        assert_eq!(execute(args, &session, &quiet()).await, ExitCode::Success);

        let on_primary = session.client().exists(None, "notes.txt").await.unwrap();
        assert!(!on_primary);
        let on_s3b = session
            .route(&session.invocation("check"), async {
                session.client().exists(None, "notes.txt").await
            })
            .await
            .unwrap();
        assert!(on_s3b);
    }

    #[tokio::test]
    async fn test_put_missing_file() {
        let session = memory_session("", false).await;
        let args = PutArgs {
            file: PathBuf::from("/definitely/not/here.txt"),
            key: None,
            bucket: None,
            content_type: None,
        };
        assert_eq!(execute(args, &session, &quiet()).await, ExitCode::GeneralError);
    }
}
