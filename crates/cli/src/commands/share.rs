//! share command - Generate presigned URLs
//!
//! Creates a time-limited URL for an object on the routed backend. GET and
//! HEAD links are only issued for objects that exist.

use std::time::Duration;

use clap::Args;
use dynstore_core::{Error, PresignMethod};
use jiff::Timestamp;
use serde::Serialize;

use super::report;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, Paint};
use crate::session::Session;

/// Longest lifetime a presigned URL may have (7 days)
const MAX_EXPIRATION_SECS: u64 = 7 * 86400;

/// Generate a presigned URL
#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Object key
    pub key: String,

    /// Bucket; the backend's default bucket when omitted
    #[arg(long)]
    pub bucket: Option<String>,

    /// Link lifetime (e.g. 30m, 12h, 7d); plain numbers are seconds
    #[arg(short, long, default_value = "7d")]
    pub expire: String,

    /// HTTP method the link allows (get, put, delete, head)
    #[arg(short, long, default_value = "get")]
    pub method: PresignMethod,
}

#[derive(Debug, Serialize)]
struct ShareOutput {
    backend: String,
    bucket: String,
    key: String,
    method: PresignMethod,
    url: String,
    expires_secs: u64,
    expires_at: String,
}

pub async fn execute(args: ShareArgs, session: &Session, formatter: &Formatter) -> ExitCode {
    let expires_secs = match parse_expiration(&args.expire) {
        Ok(secs) => secs,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };
    let ttl = Duration::from_secs(expires_secs);

    let invocation = session
        .invocation("share")
        .arg("key", args.key.clone())
        .arg("bucket", args.bucket.clone());

    let result = session
        .route(&invocation, async {
            let client = session.client();
            let backend = client.backend_name()?;
            let bucket = client.bucket_for(args.bucket.as_deref())?;

            if matches!(args.method, PresignMethod::Get | PresignMethod::Head)
                && !client.exists(Some(&bucket), &args.key).await?
            {
                return Err(Error::NotFound(format!(
                    "Object not found: {bucket}/{}",
                    args.key
                )));
            }

            let url = client
                .presign(Some(&bucket), &args.key, args.method, ttl)
                .await?;
            Ok::<_, Error>((backend, bucket, url))
        })
        .await;

    let (backend, bucket, url) = match result {
        Ok(shared) => shared,
        Err(e) => return report(formatter, &format!("Failed to share '{}'", args.key), &e),
    };

    let expires_at = Timestamp::now()
        .checked_add(ttl)
        .map(|ts| ts.to_string())
        .unwrap_or_default();

    if formatter.is_json() {
        formatter.json(&ShareOutput {
            backend,
            bucket,
            key: args.key,
            method: args.method,
            url,
            expires_secs,
            expires_at,
        });
    } else {
        formatter.println(&format!(
            "{} {}:{bucket}/{}",
            formatter.paint(Paint::Label, "Object:"),
            formatter.paint(Paint::Name, &backend),
            args.key
        ));
        formatter.println(&format!(
            "{} {}",
            formatter.paint(Paint::Label, "Method:"),
            args.method.as_str()
        ));
        formatter.println(&format!(
            "{} {}",
            formatter.paint(Paint::Label, "Expires:"),
            format_duration(expires_secs)
        ));
        formatter.println(&format!(
            "{} {}",
            formatter.paint(Paint::Label, "URL:"),
            formatter.paint(Paint::Url, &url)
        ));
    }

    ExitCode::Success
}

/// Parse a lifetime such as `90`, `30m`, `12h`, `7d` or `1w` into seconds
fn parse_expiration(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Expiration cannot be empty".to_string());
    }

    let (digits, unit) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&s[..idx], c.to_ascii_lowercase()),
        _ => (s, 's'),
    };
    let count: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid expiration: {s}"))?;
    let unit_secs = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 7 * 86400,
        other => return Err(format!("Unknown expiration unit '{other}' in {s}")),
    };

    let secs = count
        .checked_mul(unit_secs)
        .ok_or_else(|| format!("Expiration too large: {s}"))?;
    if secs == 0 {
        return Err("Expiration must be positive".to_string());
    }
    if secs > MAX_EXPIRATION_SECS {
        return Err(format!("Expiration {s} exceeds the maximum of 7d"));
    }
    Ok(secs)
}

fn format_duration(secs: u64) -> String {
    let (days, hours, mins) = (secs / 86400, (secs % 86400) / 3600, (secs % 3600) / 60);
    match (days, hours, mins) {
        (0, 0, 0) => format!("{secs} second(s)"),
        (0, 0, m) => format!("{m} minute(s)"),
        (0, h, 0) => format!("{h} hour(s)"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, 0, _) => format!("{d} day(s)"),
        (d, h, _) => format!("{d}d {h}h"),
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

    fn args(key: &str, method: PresignMethod) -> ShareArgs {
        ShareArgs {
            key: key.to_string(),
            bucket: None,
            expire: "1h".to_string(),
            method,
        }
    }

    #[test]
    fn test_parse_expiration() {
        assert_eq!(parse_expiration("90"), Ok(90));
        assert_eq!(parse_expiration("30m"), Ok(1800));
        assert_eq!(parse_expiration("12H"), Ok(43200));
        assert_eq!(parse_expiration("7d"), Ok(604800));
        assert_eq!(parse_expiration("1w"), Ok(604800));
        assert!(parse_expiration("").is_err());
        assert!(parse_expiration("0").is_err());
        assert!(parse_expiration("8d").is_err());
        assert!(parse_expiration("5y").is_err());
        assert!(parse_expiration("abc").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45 second(s)");
        assert_eq!(format_duration(120), "2 minute(s)");
        assert_eq!(format_duration(3600), "1 hour(s)");
        assert_eq!(format_duration(5400), "1h 30m");
        assert_eq!(format_duration(604800), "7 day(s)");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[tokio::test]
    async fn test_share_existing_object() {
        let session = memory_session("", false).await;
        session
            .client()
            .upload(None, "a.txt", "x", None)
            .await
            .unwrap();
        let code = execute(args("a.txt", PresignMethod::Get), &session, &quiet()).await;
        assert_eq!(code, ExitCode::Success);
    }

    #[tokio::test]
    async fn test_share_requires_object_for_get() {
        let session = memory_session("", false).await;
        let code = execute(args("missing.txt", PresignMethod::Get), &session, &quiet()).await;
        assert_eq!(code, ExitCode::NotFound);

        let code = execute(args("missing.txt", PresignMethod::Put), &session, &quiet()).await;
        assert_eq!(code, ExitCode::Success);
    }

    #[tokio::test]
    async fn test_share_rejects_bad_expiration() {
        let session = memory_session("", false).await;
        let mut share = args("a.txt", PresignMethod::Put);
        share.expire = "30d".to_string();
        assert_eq!(execute(share, &session, &quiet()).await, ExitCode::UsageError);
    }
}
