//! Common utilities for CLI tests.
#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A private data directory for one test. Disk-space thresholds are zeroed
/// so the tests do not depend on the host's free space.
pub struct TallyHome {
    dir: TempDir,
}

impl TallyHome {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::write(
            dir.path().join("config.toml"),
            "[storage]\nmin_free_mb = 0\nwarn_free_mb = 0\n",
        )
        .expect("Failed to write config");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tally").expect("tally binary not built");
        cmd.env("TALLY_HOME", self.dir.path())
            .env_remove("TALLY_LOG")
            .env_remove("TALLY_ENV");
        cmd
    }

    /// Run `tally <args>`, expect success and parse stdout as JSON.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).output().expect("Failed to run tally");
        assert!(
            output.status.success(),
            "tally {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("Failed to parse JSON output")
    }

    /// Run `tally <args>` and return its exit code and stderr.
    pub fn fail(&self, args: &[&str]) -> (i32, String) {
        let output = self.cmd().args(args).output().expect("Failed to run tally");
        assert!(!output.status.success(), "tally {:?} unexpectedly succeeded", args);
        (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
    }
}
