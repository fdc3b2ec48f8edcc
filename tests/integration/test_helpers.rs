//! Shared helpers for end-to-end tests.
//!
//! Provides fake agent executables (shell scripts that print stream-JSON),
//! stream line builders, and environment snapshots pointing the locator at
//! the fake, so individual test modules can focus on behaviour.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use trove_sidecar::config::{Environment, ENV_CLAUDE_PATH};

/// Minimal valid document.
pub const DOC: &str = "<!DOCTYPE html>\n<html>\n<head>\n<title>Todo</title>\n</head>\n<body>\n<ul id=\"items\"></ul>\n</body>\n</html>";

/// A stream-JSON `assistant` line holding one text block.
pub fn assistant_line(text: &str) -> String {
    json!({
        "type": "assistant",
        "message": {
            "id": "msg_1",
            "role": "assistant",
            "content": [{ "type": "text", "text": text }]
        }
    })
    .to_string()
}

/// A successful stream-JSON `result` line.
pub fn result_line(text: &str) -> String {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text,
        "num_turns": 1
    })
    .to_string()
}

/// The `system` init line the CLI prints first.
pub fn init_line() -> String {
    json!({ "type": "system", "subtype": "init", "session_id": "fake" }).to_string()
}

/// A fake `claude` executable in its own scratch directory.
///
/// Every run records its arguments (one per line) to `args.txt` and its
/// working directory to `cwd.txt`, then runs the given shell body.
pub struct FakeClaude {
    dir: TempDir,
    path: PathBuf,
}

impl FakeClaude {
    /// Fake running an arbitrary shell body.
    pub fn with_script(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("claude");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{args}'\npwd > '{cwd}'\n{body}\n",
            args = dir.path().join("args.txt").display(),
            cwd = dir.path().join("cwd.txt").display(),
        );
        fs::write(&path, script).expect("write fake claude");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake claude");
        Self { dir, path }
    }

    /// Fake printing the given stream lines and exiting 0.
    pub fn emitting(lines: &[String]) -> Self {
        Self::with_script(&format!(
            "cat <<'TROVE_STREAM'\n{}\nTROVE_STREAM",
            lines.join("\n")
        ))
    }

    /// Path of the executable.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory holding the fake and its records.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Recorded arguments of the last run, if it ran.
    pub fn recorded_args(&self) -> Option<Vec<String>> {
        fs::read_to_string(self.dir.path().join("args.txt"))
            .ok()
            .map(|raw| raw.lines().map(str::to_owned).collect())
    }

    /// Recorded working directory of the last run, if it ran.
    pub fn recorded_cwd(&self) -> Option<PathBuf> {
        fs::read_to_string(self.dir.path().join("cwd.txt"))
            .ok()
            .map(|raw| PathBuf::from(raw.trim()))
    }

    /// Environment snapshot that makes the locator pick this fake.
    pub fn environment(&self) -> Environment {
        Environment::from_pairs([
            (ENV_CLAUDE_PATH, self.path.to_string_lossy().into_owned()),
            ("PATH", "/usr/bin:/bin".to_owned()),
        ])
    }
}

/// Value following `flag` in a recorded argument list.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

/// Split captured stdout into protocol lines.
pub fn protocol_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(str::to_owned)
        .collect()
}
