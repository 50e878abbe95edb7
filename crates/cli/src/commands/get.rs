//! get command - Download an object
//!
//! Streams the object to a local file, or to stdout when the destination
//! is `-`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use dynstore_core::{ByteStream, Error};
use futures::TryStreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{format_size, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// Download an object
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Object key
    pub key: String,

    /// Destination file, `-` for stdout; defaults to the key's file name
    pub dest: Option<PathBuf>,

    /// Bucket; the backend's default bucket when omitted
    #[arg(long)]
    pub bucket: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    backend: String,
    bucket: String,
    key: String,
    path: String,
    size_bytes: u64,
    size_human: String,
}

enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    fn for_args(args: &GetArgs) -> Self {
        match &args.dest {
            Some(path) if path.as_os_str() == "-" => Destination::Stdout,
            Some(path) => Destination::File(path.clone()),
            None => {
                let name = args.key.rsplit('/').find(|part| !part.is_empty());
                Destination::File(PathBuf::from(name.unwrap_or("download")))
            }
        }
    }

    fn display(&self) -> String {
        match self {
            Destination::Stdout => "-".to_string(),
            Destination::File(path) => path.display().to_string(),
        }
    }
}

async fn copy_stream<W>(mut stream: ByteStream, writer: &mut W) -> anyhow::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

async fn write_to(stream: ByteStream, destination: &Destination) -> anyhow::Result<u64> {
    match destination {
        Destination::Stdout => copy_stream(stream, &mut tokio::io::stdout()).await,
        Destination::File(path) => {
            let mut file = create_file(path).await?;
            copy_stream(stream, &mut file)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))
        }
    }
}

async fn create_file(path: &Path) -> anyhow::Result<tokio::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))
}

pub async fn execute(args: GetArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let invocation = session
        .invocation("get")
        .arg("key", args.key.clone())
        .arg("bucket", args.bucket.clone());
    let destination = Destination::for_args(&args);

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;
            let stream = client.open(Some(&bucket), &args.key).await?;
            Ok::<_, Error>((backend, bucket, stream))
        })
        .await;

    let (backend, bucket, stream) = match result {
        Ok(opened) => opened,
        Err(e) => return report(formatter, &format!("Failed to download '{}'", args.key), &e),
    };

    let size = match write_to(stream, &destination).await {
        Ok(size) => size,
        Err(e) => {
            formatter.error(&format!("Failed to download '{}': {e:#}", args.key));
            return match e.downcast_ref::<Error>() {
                Some(error) => ExitCode::from_error(error),
                None => ExitCode::GeneralError,
            };
        }
    };

    let output = GetOutput {
        backend,
        bucket,
        key: args.key.clone(),
        path: destination.display(),
        size_bytes: size,
        size_human: format_size(size),
    };

    if formatter.is_json() {
        if matches!(destination, Destination::File(_)) {
            formatter.json(&output);
        }
    } else if matches!(destination, Destination::File(_)) {
        formatter.success(&format!(
            "Downloaded {}:{}/{} -> {} ({})",
            output.backend,
            output.bucket,
            output.key,
            formatter.paint(Paint::Object, &output.path),
            formatter.paint(Paint::Size, &output.size_human)
        ));
    }

    ExitCode::Success
}
