#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A throwaway workspace root for driving the CLI.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = taskdesk_cmd();
        cmd.env("TASKDESK_ROOT", self.dir.path());
        cmd
    }

    /// Run a command with `--json` and return the parsed envelope.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("json envelope")
    }

    /// Sign up and return the new uid. Leaves the new account signed in.
    pub fn signup(&self, email: &str, role: &str) -> String {
        let value = self.json(&[
            "signup",
            "--email",
            email,
            "--password",
            "correct horse",
            "--role",
            role,
        ]);
        value["data"]["uid"].as_str().expect("uid").to_string()
    }

    pub fn signin(&self, email: &str) {
        self.cmd()
            .args(["signin", "--email", email, "--password", "correct horse"])
            .assert()
            .success();
    }

    /// Create a task as the signed-in identity and return its id.
    pub fn new_task(&self, title: &str, assign: Option<&str>) -> String {
        let mut args = vec!["task", "new", title, "--description", "details"];
        if let Some(assignee) = assign {
            args.extend(["--assign", assignee]);
        }
        let value = self.json(&args);
        value["data"]["id"].as_str().expect("task id").to_string()
    }
}

pub fn taskdesk_cmd() -> Command {
    let mut cmd = Command::cargo_bin("taskdesk").expect("binary");
    cmd.env_remove("TASKDESK_EVENTS");
    cmd.env_remove("RUST_LOG");
    cmd
}
