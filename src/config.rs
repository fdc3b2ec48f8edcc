//! Configuration layering: built-in defaults, optional TOML file, environment
//! overrides, and the log format selector.
//!
//! Every tunable resolves with the precedence
//! explicit flag > environment variable > config file > built-in default.
//! The process environment is captured once into an [`Environment`] snapshot
//! so that resolution and executable discovery stay pure functions of it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

use crate::{AppError, Result};

/// Default model identifier passed to the agent.
pub const DEFAULT_MODEL: &str = "sonnet";
/// Default agent turn budget.
pub const DEFAULT_MAX_TURNS: u32 = 3;
/// Default run timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

/// Model override.
pub const ENV_MODEL: &str = "TROVE_MODEL";
/// Turn budget override.
pub const ENV_MAX_TURNS: &str = "TROVE_MAX_TURNS";
/// Timeout override (milliseconds).
pub const ENV_TIMEOUT_MS: &str = "TROVE_TIMEOUT_MS";
/// Explicit agent executable path, consulted before any search.
pub const ENV_CLAUDE_PATH: &str = "TROVE_CLAUDE_PATH";
/// Path of an optional TOML config file.
pub const ENV_CONFIG: &str = "TROVE_CONFIG";
/// Log output format (`text` or `json`).
pub const ENV_LOG_FORMAT: &str = "TROVE_LOG_FORMAT";

// ── Environment snapshot ─────────────────────────────────────────────────────

/// Immutable snapshot of environment variables.
///
/// Empty or whitespace-only values are treated as unset, so `TROVE_MODEL=`
/// falls through to the next precedence level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment. Non-UTF-8 entries are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit key/value pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self { vars }
    }

    /// Return a copy of this snapshot with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Iterate over every captured variable.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Look up a variable, treating blank values as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

// ── Config file ──────────────────────────────────────────────────────────────

/// Optional settings file, parsed from TOML.
///
/// ```toml
/// model = "opus"
/// max_turns = 5
/// timeout_ms = 240000
/// claude_path = "/opt/claude/bin/claude"
/// search_dirs = ["/opt/tools/bin"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    /// Model identifier.
    pub model: Option<String>,
    /// Agent turn budget.
    pub max_turns: Option<u32>,
    /// Run timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Explicit agent executable path.
    pub claude_path: Option<PathBuf>,
    /// Extra directories searched for the agent executable after `PATH`.
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
}

impl FileConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, is not valid
    /// TOML, or contains a zero turn budget or timeout.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_turns == Some(0) {
            return Err(AppError::Config(
                "max_turns must be greater than zero".into(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(AppError::Config(
                "timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ── Precedence helpers ───────────────────────────────────────────────────────

/// Parse a strictly positive integer, rejecting zero, signs that make the
/// value negative, and anything non-numeric.
#[must_use]
pub fn parse_positive<T>(raw: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|value| *value > T::default())
}

/// Resolve a positive integer tunable through the precedence chain.
///
/// # Errors
///
/// Returns `AppError::Usage` naming the flag or the environment variable
/// whose value is not a positive integer.
pub fn resolve_positive<T>(
    flag_value: Option<&str>,
    flag_name: &str,
    env: &Environment,
    env_key: &str,
    file_value: Option<T>,
    default: T,
) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
{
    if let Some(raw) = flag_value {
        return parse_positive(raw)
            .ok_or_else(|| AppError::Usage(format!("{flag_name} must be a positive integer")));
    }
    if let Some(raw) = env.get(env_key) {
        return parse_positive(raw)
            .ok_or_else(|| AppError::Usage(format!("{env_key} must be a positive integer")));
    }
    Ok(file_value.unwrap_or(default))
}

/// Resolve a string tunable through the precedence chain.
#[must_use]
pub fn resolve_string(
    flag_value: Option<&str>,
    env: &Environment,
    env_key: &str,
    file_value: Option<&str>,
    default: &str,
) -> String {
    flag_value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| env.get(env_key).map(str::trim))
        .or(file_value)
        .unwrap_or(default)
        .to_owned()
}

// ── Log format ───────────────────────────────────────────────────────────────

/// Diagnostic log output format. Logs always go to stderr.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Read the format from [`ENV_LOG_FORMAT`], defaulting to text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unrecognized value.
    pub fn from_env(env: &Environment) -> Result<Self> {
        match env.get(ENV_LOG_FORMAT) {
            None => Ok(Self::default()),
            Some(raw) => <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
                AppError::Config(format!(
                    "{ENV_LOG_FORMAT} must be `text` or `json`, got `{raw}`"
                ))
            }),
        }
    }
}
