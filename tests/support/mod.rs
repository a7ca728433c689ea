#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A scratch working directory with its own projects root.
///
/// HOME and XDG_CONFIG_HOME point inside the temp dir so a developer's
/// user config never leaks into a test run.
pub struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("projects")
    }

    pub fn tasks_dir(&self, project: &str) -> PathBuf {
        self.root().join(project).join("tasks")
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("taskflow").expect("binary");
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path().join(".config"))
            .env_remove("TASKFLOW_ROOT")
            .env_remove("TASKFLOW_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--root")
            .arg(self.root());
        cmd
    }

    /// Run a command with `--json` and return `data` from the envelope.
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
        let value: Value = serde_json::from_slice(&output).expect("json envelope");
        assert_eq!(value["status"], "success", "{value}");
        value["data"].clone()
    }

    /// Run a failing command with `--json` and return the error envelope.
    pub fn json_error(&self, args: &[&str], exit_code: i32) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .assert()
            .code(exit_code)
            .get_output()
            .stdout
            .clone();
        let value: Value = serde_json::from_slice(&output).expect("json envelope");
        assert_eq!(value["status"], "error", "{value}");
        value
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn task_files(&self, project: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.tasks_dir(project))
            .expect("read tasks dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
