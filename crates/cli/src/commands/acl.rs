//! acl command - Inspect or change access control lists
//!
//! Works on a bucket, or on one object when a key is given.

use clap::Subcommand;
use dynstore_core::{AccessControlPolicy, CannedAcl, Error};
use serde::Serialize;

use super::report;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

#[derive(Subcommand, Debug)]
pub enum AclCommands {
    /// Show the owner and grants
    Get {
        /// Object key; the bucket itself when omitted
        key: Option<String>,

        /// Bucket; the backend's default bucket when omitted
        #[arg(long)]
        bucket: Option<String>,
    },

    /// Apply a canned ACL
    Set {
        /// private, public-read, public-read-write or authenticated-read
        acl: CannedAcl,

        /// Object key; the bucket itself when omitted
        key: Option<String>,

        /// Bucket; the backend's default bucket when omitted
        #[arg(long)]
        bucket: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct AclOutput {
    backend: String,
    bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(flatten)]
    policy: AccessControlPolicy,
}

fn target(bucket: &str, key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{bucket}/{key}"),
        None => bucket.to_string(),
    }
}

pub async fn execute(cmd: AclCommands, session: &Session, formatter: &Formatter) -> ExitCode {
    match cmd {
        AclCommands::Get { key, bucket } => get(key, bucket, session, formatter).await,
        AclCommands::Set { acl, key, bucket } => set(acl, key, bucket, session, formatter).await,
    }
}

async fn get(
    key: Option<String>,
    bucket: Option<String>,
    session: &Session,
    formatter: &Formatter,
) -> ExitCode {
    let invocation = session
        .invocation("acl-get")
        .arg("key", key.clone())
        .arg("bucket", bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(bucket.as_deref())?;
            let policy = client.get_acl(Some(&bucket), key.as_deref()).await?;
            Ok::<_, Error>(AclOutput {
                backend,
                bucket,
                key: key.clone(),
                policy,
            })
        })
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => return report(formatter, "Failed to read ACL", &e),
    };

    if formatter.is_json() {
        formatter.json(&output);
        return ExitCode::Success;
    }

    formatter.println(&format!(
        "{} {}:{}",
        formatter.paint(Paint::Label, "Target:"),
        formatter.paint(Paint::Name, &output.backend),
        target(&output.bucket, output.key.as_deref())
    ));
    if let Some(owner) = &output.policy.owner {
        formatter.println(&format!("{} {owner}", formatter.paint(Paint::Label, "Owner:")));
    }
    let mut table = formatter.table(&["GRANTEE", "PERMISSION"]);
    for grant in &output.policy.grants {
        table.add_row(vec![grant.grantee.clone(), grant.permission.to_string()]);
    }
    formatter.print_table(&table);

    ExitCode::Success
}

async fn set(
    acl: CannedAcl,
    key: Option<String>,
    bucket: Option<String>,
    session: &Session,
    formatter: &Formatter,
) -> ExitCode {
    let invocation = session
        .invocation("acl-set")
        .arg("acl", acl.as_str())
        .arg("key", key.clone())
        .arg("bucket", bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(bucket.as_deref())?;
            client.set_acl(Some(&bucket), key.as_deref(), acl).await?;
            Ok::<_, Error>((backend, bucket))
        })
        .await;

    match result {
        Ok((backend, bucket)) => {
            if formatter.is_json() {
                formatter.json(&serde_json::json!({
                    "backend": backend,
                    "bucket": bucket,
                    "key": key,
                    "acl": acl,
                }));
            } else {
                formatter.success(&format!(
                    "Set {acl} on {backend}:{}",
                    target(&bucket, key.as_deref())
                ));
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, "Failed to set ACL", &e),
    }
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

    #[test]
    fn test_target() {
        assert_eq!(target("media", None), "media");
        assert_eq!(target("media", Some("a.txt")), "media/a.txt");
    }

    #[tokio::test]
    async fn test_set_then_get_object_acl() {
        let session = memory_session("", false).await;
        session
            .client()
            .upload(None, "a.txt", "x", None)
            .await
            .unwrap();

        let set = AclCommands::Set {
            acl: CannedAcl::PublicRead,
            key: Some("a.txt".to_string()),
            bucket: None,
        };
        assert_eq!(execute(set, &session, &quiet()).await, ExitCode::Success);

        let policy = session
            .client()
            .get_acl(None, Some("a.txt"))
            .await
            .unwrap();
        assert_eq!(policy.grants, CannedAcl::PublicRead.grants("s3a"));

        let get = AclCommands::Get {
            key: Some("a.txt".to_string()),
            bucket: None,
        };
        assert_eq!(execute(get, &session, &quiet()).await, ExitCode::Success);
    }

    #[tokio::test]
    async fn test_acl_missing_object() {
        let session = memory_session("", false).await;
        let get = AclCommands::Get {
            key: Some("missing".to_string()),
            bucket: None,
        };
        assert_eq!(execute(get, &session, &quiet()).await, ExitCode::NotFound);
    }
}
