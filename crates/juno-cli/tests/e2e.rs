//! End-to-end tests for Juno CLI commands.
//!
//! Each test runs the `juno` binary against a fresh notebook directory.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Isolated Juno home with its own notebook directory.
struct TestHome {
    temp_dir: TempDir,
}

impl TestHome {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn notebook_dir(&self) -> PathBuf {
        self.temp_dir.path().join("notes")
    }

    fn juno(&self) -> Command {
        let mut cmd = Command::cargo_bin("juno").expect("juno binary");
        cmd.env("JUNO_HOME", self.temp_dir.path().join("home"))
            .env("JUNO_INTERPRETERS", "echo,sh")
            .env_remove("JUNO_NOTEBOOK_DIR")
            .env_remove("JUNO_NOTEBOOK_RELOAD_FROM_STORAGE")
            .arg("--notebook-dir")
            .arg(self.notebook_dir());
        cmd
    }

    /// Run a command that prints an id and return it.
    fn id_of(&self, args: &[&str]) -> String {
        let output = self.juno().args(args).output().expect("run juno");
        assert!(
            output.status.success(),
            "juno {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout)
            .expect("utf8 stdout")
            .trim()
            .to_string()
    }

    fn new_note(&self, name: &str) -> String {
        self.id_of(&["new", name])
    }

    fn add(&self, note: &str, text: &str) -> String {
        self.id_of(&["add", note, text])
    }

    fn document(&self, note: &str) -> serde_json::Value {
        let path = self.notebook_dir().join(note).join("note.json");
        let text = fs::read_to_string(path).expect("read note.json");
        serde_json::from_str(&text).expect("parse note.json")
    }
}

// =============================================================================
// Note Management
// =============================================================================

#[test]
fn test_new_persists_note() {
    let home = TestHome::new();
    let id = home.new_note("first");

    assert!(id.starts_with("note_"));
    let doc = home.document(&id);
    assert_eq!(doc["name"], "first");
    assert_eq!(doc["interpreters"], serde_json::json!(["echo", "sh"]));
}

#[test]
fn test_list_empty() {
    let home = TestHome::new();
    home.juno()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No notes found"));
}

#[test]
fn test_list_shows_notes() {
    let home = TestHome::new();
    let id = home.new_note("analysis");
    home.add(&id, "one");

    home.juno()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("analysis"))
        .stdout(predicate::str::contains("1 paragraphs"));
}

#[test]
fn test_unknown_note_has_hint() {
    let home = TestHome::new();
    home.juno()
        .args(["run", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_add_rejects_unknown_interpreter() {
    let home = TestHome::new();
    let id = home.new_note("n");

    home.juno()
        .args(["add", &id, "%python print(1)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));

    let doc = home.document(&id);
    assert_eq!(doc["paragraphs"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_remove_note() {
    let home = TestHome::new();
    let id = home.new_note("doomed");

    home.juno()
        .args(["rm", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    assert!(!home.notebook_dir().join(&id).exists());
    home.juno().args(["rm", &id]).assert().failure();
}

// =============================================================================
// Running
// =============================================================================

#[test]
fn test_run_echo_paragraph() {
    let home = TestHome::new();
    let id = home.new_note("echoes");
    let paragraph = home.add(&id, "hello");

    home.juno()
        .args(["run", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo: hello"))
        .stdout(predicate::str::contains("FINISHED"))
        .stdout(predicate::str::contains("Completed"));

    let doc = home.document(&id);
    assert_eq!(doc["paragraphs"][0]["id"], paragraph.as_str());
    assert_eq!(doc["paragraphs"][0]["status"], "FINISHED");
    assert_eq!(doc["paragraphs"][0]["result"]["message"], "echo: hello");
}

#[test]
fn test_run_by_note_name() {
    let home = TestHome::new();
    let id = home.new_note("by-name");
    home.add(&id, "hi");

    home.juno()
        .args(["run", "by-name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo: hi"));
}

#[test]
fn test_run_single_paragraph() {
    let home = TestHome::new();
    let id = home.new_note("partial");
    home.add(&id, "first");
    let second = home.add(&id, "second");

    home.juno()
        .args(["run", &id, "--paragraph", &second])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo: second"))
        .stdout(predicate::str::contains("echo: first").not());

    let doc = home.document(&id);
    assert_eq!(doc["paragraphs"][0]["status"], "READY");
    assert_eq!(doc["paragraphs"][1]["status"], "FINISHED");
}

#[test]
fn test_run_empty_note() {
    let home = TestHome::new();
    let id = home.new_note("empty");

    home.juno()
        .args(["run", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("No paragraphs found"));
}

#[cfg(unix)]
#[test]
fn test_run_shell_paragraph() {
    let home = TestHome::new();
    let id = home.new_note("shell");
    home.add(&id, "%sh echo from-shell");

    home.juno()
        .args(["run", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-shell"));
}

#[cfg(unix)]
#[test]
fn test_failing_paragraph_fails_run() {
    let home = TestHome::new();
    let id = home.new_note("broken");
    home.add(&id, "%sh exit 3");

    home.juno()
        .args(["run", &id])
        .assert()
        .failure()
        .stdout(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("1 of 1 paragraph(s) failed"));

    let doc = home.document(&id);
    assert_eq!(doc["paragraphs"][0]["status"], "ERROR");
}

#[test]
fn test_clone_keeps_results() {
    let home = TestHome::new();
    let id = home.new_note("original");
    home.add(&id, "kept");
    home.juno().args(["run", &id]).assert().success();

    let copy = home.id_of(&["clone", &id, "copy"]);
    assert_ne!(copy, id);

    home.juno()
        .args(["show", &copy])
        .assert()
        .success()
        .stdout(predicate::str::contains("copy"))
        .stdout(predicate::str::contains("echo: kept"));
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn test_cron_schedule_and_clear() {
    let home = TestHome::new();
    let id = home.new_note("nightly");

    home.juno()
        .args(["cron", &id, "0 0 3 * * ?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scheduled"));

    let doc = home.document(&id);
    assert_eq!(doc["config"]["enabled"], true);
    assert_eq!(doc["config"]["cron"], "0 0 3 * * ?");

    home.juno()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("cron: 0 0 3 * * ?"));

    home.juno().args(["cron", &id]).assert().success();
    let doc = home.document(&id);
    assert_eq!(doc["config"]["enabled"], false);
    assert!(doc["config"].get("cron").is_none());
}

#[test]
fn test_invalid_cron_is_rejected() {
    let home = TestHome::new();
    let id = home.new_note("bad");

    home.juno()
        .args(["cron", &id, "* * * * *"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid cron expression"))
        .stderr(predicate::str::contains("hint:"));

    let doc = home.document(&id);
    assert_eq!(doc["config"]["enabled"], false);
}

#[test]
fn test_interpreters_listing() {
    let home = TestHome::new();
    home.juno()
        .arg("interpreters")
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"))
        .stdout(predicate::str::contains("fifo"));
}
