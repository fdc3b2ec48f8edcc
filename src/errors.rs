//! Error types shared across the sidecar.

use std::fmt::{Display, Formatter};

/// Shared sidecar result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Sidecar error enumeration covering every way a generation can fail.
///
/// The first six variants form the user-facing taxonomy surfaced on the
/// `ERROR:` protocol line; `Config` and `Io` cover ambient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Bad or missing invocation arguments. No subprocess is started.
    Usage(String),
    /// Edit path escapes the apps directory or is not an existing document.
    PathSafety(String),
    /// The agent executable could not be discovered.
    ExecutableNotFound(String),
    /// The agent run exceeded its configured time budget.
    Timeout(String),
    /// The run was cancelled from outside the pipeline.
    Cancelled(String),
    /// The generated document failed normalization or structural validation.
    MalformedOutput(String),
    /// Any other failure surfaced from the agent run.
    Upstream(String),
    /// Configuration file parsing failure.
    Config(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// Bare human-readable message, without the category prefix.
    ///
    /// This is the text written after `ERROR:` on the protocol line.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Usage(msg)
            | Self::PathSafety(msg)
            | Self::ExecutableNotFound(msg)
            | Self::Timeout(msg)
            | Self::Cancelled(msg)
            | Self::MalformedOutput(msg)
            | Self::Upstream(msg)
            | Self::Config(msg)
            | Self::Io(msg) => msg,
        }
    }

    /// Whether the error was raised before any agent process could start.
    #[must_use]
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            Self::Usage(_) | Self::PathSafety(_) | Self::ExecutableNotFound(_) | Self::Config(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "usage: {msg}"),
            Self::PathSafety(msg) => write!(f, "path safety: {msg}"),
            Self::ExecutableNotFound(msg) => write!(f, "executable not found: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::MalformedOutput(msg) => write!(f, "malformed output: {msg}"),
            Self::Upstream(msg) => write!(f, "upstream: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
