//! Agent executable discovery.
//!
//! Discovery is an ordered list of independent strategies. Each one is a
//! function of the [`Environment`] snapshot, the [`LocatorConfig`], and the
//! filesystem, returning an optional path. The first hit wins; a strategy
//! that fails for any reason simply yields `None`. The first three only probe
//! the filesystem; the login-shell query runs a child process and is async.
//!
//! | Order | Strategy            | Looks at                                   |
//! |-------|---------------------|--------------------------------------------|
//! | 1     | `explicit_override` | `TROVE_CLAUDE_PATH`, then `claude_path`    |
//! | 2     | `search_path`       | every directory in `PATH`                  |
//! | 3     | `conventional_dirs` | config `search_dirs`, then install dirs    |
//! | 4     | `login_shell`       | `command -v` inside a login shell          |

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{Environment, ENV_CLAUDE_PATH};
use crate::{AppError, Result};

/// Base name of the agent CLI.
pub const AGENT_BINARY: &str = "claude";

/// Installation directories probed when `PATH` does not contain the agent.
/// A leading `~/` expands to the user's home directory.
pub const CONVENTIONAL_DIRS: &[&str] = &[
    "~/.claude/local",
    "~/.local/bin",
    "~/.npm-global/bin",
    "~/.bun/bin",
    "~/.volta/bin",
    "~/.yarn/bin",
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
];

/// Shells tried, after `$SHELL`, for the login-shell lookup.
const FALLBACK_SHELLS: &[&str] = &["/bin/zsh", "/bin/bash", "/bin/sh"];

/// Upper bound on a single login-shell lookup.
pub const SHELL_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Error text when every strategy comes up empty.
pub const NOT_FOUND_MESSAGE: &str =
    "Claude Code CLI not found. Install it or set TROVE_CLAUDE_PATH to its location";

/// Discovery settings that come from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorConfig {
    /// Explicit executable path, consulted after the environment override.
    pub configured_path: Option<PathBuf>,
    /// Extra directories probed before the conventional install locations.
    pub extra_dirs: Vec<PathBuf>,
}

/// A filesystem-only discovery strategy.
pub type Strategy = fn(&Environment, &LocatorConfig) -> Option<PathBuf>;

/// Filesystem strategies, in the order they are tried. [`login_shell`]
/// runs after all of them.
pub const FILESYSTEM_STRATEGIES: &[(&str, Strategy)] = &[
    ("explicit_override", explicit_override),
    ("search_path", search_path),
    ("conventional_dirs", conventional_dirs),
];

/// Run the strategies in order and return the first executable found.
pub async fn locate(env: &Environment, config: &LocatorConfig) -> Option<PathBuf> {
    let probed = FILESYSTEM_STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(env, config)?;
        debug!(strategy = name, path = %found.display(), "agent executable located");
        Some(found)
    });
    if probed.is_some() {
        return probed;
    }

    let found = login_shell(env).await?;
    debug!(strategy = "login_shell", path = %found.display(), "agent executable located");
    Some(found)
}

/// Like [`locate`], but a miss is an error.
///
/// # Errors
///
/// Returns `AppError::ExecutableNotFound` when no strategy finds the agent.
pub async fn locate_executable(env: &Environment, config: &LocatorConfig) -> Result<PathBuf> {
    locate(env, config).await.ok_or_else(|| {
        warn!("agent executable not found by any strategy");
        AppError::ExecutableNotFound(NOT_FOUND_MESSAGE.into())
    })
}

// ── Strategies ───────────────────────────────────────────────────────────────

/// Strategy 1: `TROVE_CLAUDE_PATH`, then the config file's `claude_path`.
#[must_use]
pub fn explicit_override(env: &Environment, config: &LocatorConfig) -> Option<PathBuf> {
    let from_env = env
        .get(ENV_CLAUDE_PATH)
        .map(|raw| expand_home(raw.trim(), env));
    from_env
        .into_iter()
        .chain(config.configured_path.clone())
        .find(|candidate| is_executable(candidate))
}

/// Strategy 2: every directory listed in `PATH`.
#[must_use]
pub fn search_path(env: &Environment, _config: &LocatorConfig) -> Option<PathBuf> {
    let path_var = env.get("PATH")?;
    std::env::split_paths(path_var).find_map(|dir| probe_dir(&dir))
}

/// Strategy 3: configured extra directories, then [`CONVENTIONAL_DIRS`].
#[must_use]
pub fn conventional_dirs(env: &Environment, config: &LocatorConfig) -> Option<PathBuf> {
    config
        .extra_dirs
        .iter()
        .cloned()
        .chain(CONVENTIONAL_DIRS.iter().map(|dir| expand_home(dir, env)))
        .find_map(|dir| probe_dir(&dir))
}

/// Strategy 4: ask a login shell, which recovers `PATH` entries that only
/// interactive shell initialization sets up. `$SHELL` goes first, then
/// [`FALLBACK_SHELLS`]; each gets [`SHELL_LOOKUP_TIMEOUT`].
pub async fn login_shell(env: &Environment) -> Option<PathBuf> {
    let mut shells: Vec<PathBuf> = Vec::new();
    if let Some(shell) = env.get("SHELL") {
        shells.push(PathBuf::from(shell.trim()));
    }
    for fallback in FALLBACK_SHELLS {
        let fallback = PathBuf::from(fallback);
        if !shells.contains(&fallback) {
            shells.push(fallback);
        }
    }

    for shell in shells.iter().filter(|shell| shell.is_file()) {
        if let Some(found) = query_login_shell(shell, env, SHELL_LOOKUP_TIMEOUT).await {
            return Some(found);
        }
    }
    None
}

/// Run `command -v claude` in one login shell and accept its first output
/// line if it is an absolute path to an executable.
///
/// The shell is killed if it outlives `limit`.
pub async fn query_login_shell(
    shell: &Path,
    env: &Environment,
    limit: Duration,
) -> Option<PathBuf> {
    let mut cmd = Command::new(shell);
    cmd.args(["-l", "-c", &format!("command -v {AGENT_BINARY}")])
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            debug!(shell = %shell.display(), %err, "login shell lookup failed to run");
            return None;
        }
        Err(_) => {
            warn!(
                shell = %shell.display(),
                limit_ms = limit.as_millis(),
                "login shell lookup timed out, shell killed"
            );
            return None;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next()?.trim();
    let candidate = PathBuf::from(first_line);
    if candidate.is_absolute() && is_executable(&candidate) {
        Some(candidate)
    } else {
        debug!(shell = %shell.display(), answer = first_line, "login shell answer rejected");
        None
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Whether `path` names an existing regular file the current user may run.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn binary_names() -> &'static [&'static str] {
    if cfg!(windows) {
        &["claude.exe", "claude.cmd", "claude"]
    } else {
        &[AGENT_BINARY]
    }
}

fn probe_dir(dir: &Path) -> Option<PathBuf> {
    binary_names()
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn home_dir(env: &Environment) -> Option<PathBuf> {
    env.get("HOME")
        .or_else(|| env.get("USERPROFILE"))
        .map(PathBuf::from)
}

fn expand_home(raw: &str, env: &Environment) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir(env).map_or_else(|| PathBuf::from(raw), |home| home.join(rest)),
        None => PathBuf::from(raw),
    }
}
