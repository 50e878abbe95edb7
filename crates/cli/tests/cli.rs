//! End-to-end tests running the `dyns` binary against in-memory backends
//!
//! Every invocation is a fresh process, so backends start empty each time.

use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

const CONFIG: &str = r#"
primary = "s3a"

[backends.s3a]
type = "memory"
endpoint = "memory://s3a"
access_key = "ak"
secret_key = "sk"
default_bucket = "media"
auto_create_bucket = true

[backends.s3b]
type = "memory"
endpoint = "memory://s3b"
access_key = "ak"
secret_key = "sk"
default_bucket = "archive"
auto_create_bucket = true
"#;

struct Fixture {
    dir: TempDir,
    config: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = dir.path().join("config.toml");
        std::fs::write(&config, CONFIG).expect("write config");
        Self { dir, config }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_dyns"))
            .arg("--config")
            .arg(&self.config)
            .arg("--no-color")
            .args(args)
            .current_dir(self.dir.path())
            .env_remove("DYNSTORE_BACKEND")
            .env_remove("RUST_LOG")
            .output()
            .expect("run dyns")
    }
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn backends_json_lists_every_backend() {
    let fixture = Fixture::new();
    let output = fixture.run(&["backends", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let value = json(&output);
    assert_eq!(value["primary"], "s3a");
    assert_eq!(value["strict"], false);
    let backends = value["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["name"], "s3a");
    assert_eq!(backends[0]["primary"], true);
    assert_eq!(backends[1]["name"], "s3b");
    assert_eq!(backends[1]["default_bucket"], "archive");
}

#[test]
fn backends_health_reports_up() {
    let fixture = Fixture::new();
    let output = fixture.run(&["backends", "--health", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["status"], "UP");
}

#[test]
fn backend_flag_selects_backend() {
    let fixture = Fixture::new();
    let output = fixture.run(&["--backend", "s3b", "ls", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let value = json(&output);
    assert_eq!(value["backend"], "s3b");
    assert_eq!(value["bucket"], "archive");
}

#[test]
fn dynamic_key_from_header() {
    let fixture = Fixture::new();
    let output = fixture.run(&[
        "--backend",
        "#header.x-tenant",
        "-H",
        "x-tenant=s3b",
        "ls",
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["backend"], "s3b");
}

#[test]
fn unknown_backend_falls_back_to_primary() {
    let fixture = Fixture::new();
    let output = fixture.run(&["--backend", "nope", "ls", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["backend"], "s3a");
}

#[test]
fn strict_rejects_unknown_backend() {
    let fixture = Fixture::new();
    let output = fixture.run(&["--strict", "--backend", "nope", "ls"]);
    assert_eq!(output.status.code(), Some(6));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope"), "stderr: {stderr}");
}

#[test]
fn missing_object_exits_not_found() {
    let fixture = Fixture::new();
    let output = fixture.run(&["stat", "missing.txt"]);
    assert_eq!(output.status.code(), Some(5));
}

#[test]
fn put_reports_routed_backend() {
    let fixture = Fixture::new();
    std::fs::write(fixture.dir.path().join("notes.txt"), "hello").unwrap();

    let output = fixture.run(&["--backend", "s3b", "put", "notes.txt", "--json"]);
    assert_eq!(output.status.code(), Some(0));

    let value = json(&output);
    assert_eq!(value["backend"], "s3b");
    assert_eq!(value["key"], "notes.txt");
    assert_eq!(value["size_bytes"], 5);
}

#[test]
fn missing_config_is_usage_error() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_dyns"))
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("backends")
        .output()
        .expect("run dyns");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn completions_need_no_config() {
    let output = Command::new(env!("CARGO_BIN_EXE_dyns"))
        .args(["completions", "bash"])
        .env_remove("DYNSTORE_CONFIG")
        .output()
        .expect("run dyns");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("dyns"));
}
