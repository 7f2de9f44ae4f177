#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("feed.db")
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// The binary pointed at this workspace's database and config.
    fn murmur(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("murmur");
        cmd.env_remove("MURMUR_DB")
            .env_remove("MURMUR_PROFILE")
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(self.config())
            .arg("--db")
            .arg(self.db());
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self
            .murmur()
            .args(["--format", "json"])
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("valid json")
    }
}

fn texts(page: &Value) -> Vec<String> {
    page["tweets"]
        .as_array()
        .expect("tweets")
        .iter()
        .map(|t| t["tweet_text"].as_str().expect("text").to_string())
        .collect()
}

#[test]
fn follow_post_and_timeline_round_trip_through_the_file() {
    let ws = Workspace::new();
    ws.murmur().args(["follow", "1", "2"]).assert().success();
    for text in ["first", "second, with a comma"] {
        ws.murmur().args(["post", "2", text]).assert().success();
    }

    let page = ws.json(&["timeline", "1"]);
    assert_eq!(texts(&page).len(), 2);
    assert!(texts(&page).contains(&"second, with a comma".to_string()));

    let first = ws.json(&["timeline", "1", "--limit", "1"]);
    let cursor = first["next_cursor"].as_str().expect("cursor").to_string();
    let second = ws.json(&["timeline", "1", "--limit", "1", "--cursor", &cursor]);
    assert_eq!(texts(&second).len(), 1);
    assert_ne!(texts(&first), texts(&second));
    assert!(second["next_cursor"].is_null());

    let own = ws.json(&["tweets", "2"]);
    assert_eq!(own["source"], "storage");
    assert_eq!(texts(&own).len(), 2);
}

#[test]
fn invalid_input_exits_with_error() {
    let ws = Workspace::new();
    let stderr = failure_stderr(ws.murmur().args(["follow", "4", "4"]));
    assert!(stderr.starts_with("error: "), "{stderr}");
    assert!(stderr.contains("themselves"), "{stderr}");

    let long = "x".repeat(141);
    ws.murmur()
        .args(["post", "4", long.as_str()])
        .assert()
        .failure()
        .code(1);

    let stderr = failure_stderr(ws.murmur().args(["timeline", "4", "--cursor", "garbage"]));
    assert!(stderr.contains("invalid cursor"), "{stderr}");
}

fn failure_stderr(cmd: &mut Command) -> String {
    let output = cmd.assert().failure().code(1).get_output().stderr.clone();
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn bulk_loaders_report_counts() {
    let ws = Workspace::new();
    let follows = ws.file(
        "follows.csv",
        "follower_id,followee_id\n1,2\n1,3\n1,2\n5,5\n",
    );
    let summary = ws.json(&["load-follows", follows.to_str().expect("utf8")]);
    assert_eq!(summary["rows_read"], 4);
    assert_eq!(summary["inserted"], 2);

    let tweets = ws.file(
        "tweets.csv",
        "user_id,tweet_text\n2,hello, world\n3,from three\n2,again\n",
    );
    let summary = ws.json(&["load-tweets", tweets.to_str().expect("utf8"), "--target", "2"]);
    assert_eq!(summary["inserted"], 2);

    let stats = ws.json(&["stats"]);
    assert_eq!(stats["store"]["follows"], 2);
    assert_eq!(stats["store"]["tweets"], 2);

    let page = ws.json(&["timeline", "1"]);
    assert_eq!(texts(&page), vec!["from three", "hello, world"]);
}

#[test]
fn timeline_bench_needs_follows() {
    let ws = Workspace::new();
    let stderr = failure_stderr(ws.murmur().args(["bench-timeline", "--requests", "3"]));
    assert!(stderr.contains("FOLLOWS is empty"), "{stderr}");

    ws.murmur().args(["follow", "1", "2"]).assert().success();
    let report = ws.json(&["bench-timeline", "--requests", "3"]);
    assert_eq!(report["name"], "home_timeline");
    assert_eq!(
        report["operations"].as_u64().unwrap_or(0) + report["timeouts"].as_u64().unwrap_or(0),
        3
    );
}

#[test]
fn profiles_persist_and_apply() {
    let ws = Workspace::new();
    let other_db = ws.dir.path().join("profiled.db");
    let mut set = cargo_bin_cmd!("murmur");
    set.env_remove("MURMUR_PROFILE")
        .arg("--config")
        .arg(ws.config())
        .args(["profile", "set", "dev", "--fanout-mode", "inline", "--database"])
        .arg(&other_db)
        .assert()
        .success();
    assert!(read(&ws.config()).contains("[profiles.dev]"));

    let mut use_cmd = cargo_bin_cmd!("murmur");
    use_cmd
        .arg("--config")
        .arg(ws.config())
        .args(["profile", "use", "dev"])
        .assert()
        .success();

    let mut list = cargo_bin_cmd!("murmur");
    let output = list
        .arg("--config")
        .arg(ws.config())
        .args(["--format", "json", "profile", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let profiles: Value = serde_json::from_slice(&output).expect("json");
    assert_eq!(profiles[0]["name"], "dev");
    assert_eq!(profiles[0]["fanout_mode"], "inline");

    // Without --db the default profile picks the database.
    let mut follow = cargo_bin_cmd!("murmur");
    follow
        .env_remove("MURMUR_DB")
        .env_remove("MURMUR_PROFILE")
        .arg("--config")
        .arg(ws.config())
        .args(["follow", "8", "9"])
        .assert()
        .success();
    assert!(other_db.exists());
    assert!(!ws.db().exists());

    let mut missing = cargo_bin_cmd!("murmur");
    let stderr = failure_stderr(
        missing
            .arg("--config")
            .arg(ws.config())
            .args(["--profile", "nope", "stats"]),
    );
    assert!(stderr.contains("profile 'nope' not found"), "{stderr}");
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read config")
}

#[test]
fn completions_are_generated() {
    let output = cargo_bin_cmd!("murmur")
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("murmur"));
}
