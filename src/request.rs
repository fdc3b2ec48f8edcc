//! Invocation parsing and validation.
//!
//! Turns raw argument tokens into an immutable [`GenerationRequest`]. Flags
//! are accepted as `--flag value` or `--flag=value` anywhere on the command
//! line; every other token is a positional word. The first positional word is
//! the app name and the rest, joined with single spaces, form the prompt.
//!
//! Nothing here starts a process: every failure surfaces before the agent
//! executable is even looked up.

use std::path::{Path, PathBuf};

use crate::config::{
    self, Environment, FileConfig, DEFAULT_MAX_TURNS, DEFAULT_MODEL, DEFAULT_TIMEOUT_MS,
    ENV_CONFIG, ENV_MAX_TURNS, ENV_MODEL, ENV_TIMEOUT_MS,
};
use crate::locator::LocatorConfig;
use crate::path_safety::{self, EditScope};
use crate::{AppError, Result};

/// Maximum app name length, in UTF-8 bytes.
pub const APP_NAME_MAX_LENGTH: usize = 60;
/// Maximum prompt length, in UTF-8 bytes.
pub const APP_PROMPT_MAX_LENGTH: usize = 2000;

/// One-line usage summary, used as the text of a positional-count error.
pub const USAGE: &str = "Usage: trove-sidecar <name> <prompt...> [--edit <path> --apps-dir <dir>] \
                         [--model <name>] [--max-turns <n>] [--timeout-ms <ms>] [--config <file>]";

const FLAG_EDIT: &str = "--edit";
const FLAG_APPS_DIR: &str = "--apps-dir";
const FLAG_MODEL: &str = "--model";
const FLAG_MAX_TURNS: &str = "--max-turns";
const FLAG_TIMEOUT_MS: &str = "--timeout-ms";
const FLAG_CONFIG: &str = "--config";

const KNOWN_FLAGS: &[&str] = &[
    FLAG_EDIT,
    FLAG_APPS_DIR,
    FLAG_MODEL,
    FLAG_MAX_TURNS,
    FLAG_TIMEOUT_MS,
    FLAG_CONFIG,
];

/// Whether the agent writes a new document or revises an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationMode {
    /// Generate a new document from scratch.
    Create,
    /// Revise an existing document; the agent may only read inside the scope.
    Edit(EditScope),
}

/// Validated, immutable description of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// App name (trimmed).
    pub name: String,
    /// Natural-language prompt (trimmed).
    pub prompt: String,
    /// Create or edit, with the edit scope when editing.
    pub mode: GenerationMode,
    /// Model identifier passed to the agent.
    pub model: String,
    /// Agent turn budget.
    pub max_turns: u32,
    /// Run timeout in milliseconds.
    pub timeout_ms: u64,
}

impl GenerationRequest {
    /// The edit scope, when in edit mode.
    #[must_use]
    pub fn edit_scope(&self) -> Option<&EditScope> {
        match &self.mode {
            GenerationMode::Create => None,
            GenerationMode::Edit(scope) => Some(scope),
        }
    }
}

/// Everything the resolver produces: the request plus discovery settings
/// taken from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInvocation {
    /// The validated request.
    pub request: GenerationRequest,
    /// Executable discovery settings.
    pub locator: LocatorConfig,
}

/// Raw flag values and positional words, before validation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawArgs {
    /// Positional words in order of appearance.
    pub positionals: Vec<String>,
    /// `--edit` value.
    pub edit: Option<String>,
    /// `--apps-dir` value.
    pub apps_dir: Option<String>,
    /// `--model` value.
    pub model: Option<String>,
    /// `--max-turns` value.
    pub max_turns: Option<String>,
    /// `--timeout-ms` value.
    pub timeout_ms: Option<String>,
    /// `--config` value.
    pub config: Option<String>,
}

/// Split tokens into flags and positional words.
///
/// The token following a space-separated flag is always taken as its value,
/// even when it starts with `-`, so `--max-turns -1` reaches validation. A
/// repeated flag keeps its last value.
///
/// # Errors
///
/// Returns `AppError::Usage` when a flag is the final token and has no value.
pub fn split_args<S: AsRef<str>>(args: &[S]) -> Result<RawArgs> {
    let mut raw = RawArgs::default();
    let mut tokens = args.iter().map(AsRef::as_ref);

    while let Some(token) = tokens.next() {
        let (flag, inline_value) = match token.split_once('=') {
            Some((flag, value)) if KNOWN_FLAGS.contains(&flag) => (flag, Some(value)),
            _ => (token, None),
        };

        if !KNOWN_FLAGS.contains(&flag) {
            raw.positionals.push(token.to_owned());
            continue;
        }

        let value = match inline_value {
            Some(value) => value.to_owned(),
            None => tokens
                .next()
                .map(str::to_owned)
                .ok_or_else(|| AppError::Usage(format!("{flag} requires a value")))?,
        };

        let slot = match flag {
            FLAG_EDIT => &mut raw.edit,
            FLAG_APPS_DIR => &mut raw.apps_dir,
            FLAG_MODEL => &mut raw.model,
            FLAG_MAX_TURNS => &mut raw.max_turns,
            FLAG_TIMEOUT_MS => &mut raw.timeout_ms,
            _ => &mut raw.config,
        };
        *slot = Some(value);
    }

    Ok(raw)
}

/// Resolve an invocation into a validated request.
///
/// Checks run in this order, stopping at the first failure: positional
/// count, `--edit` without `--apps-dir`, config file, numeric tunables, name
/// and prompt content, edit-path containment.
///
/// # Errors
///
/// - `AppError::Usage` for missing positionals, missing flag values,
///   `--edit` without `--apps-dir`, non-positive numbers, or invalid
///   name/prompt text.
/// - `AppError::Config` when the config file cannot be loaded.
/// - `AppError::PathSafety` when the edit target fails containment.
pub fn resolve<S: AsRef<str>>(
    args: &[S],
    env: &Environment,
    cwd: &Path,
) -> Result<ResolvedInvocation> {
    let raw = split_args(args)?;

    let Some((name, prompt_words)) = raw.positionals.split_first() else {
        return Err(AppError::Usage(USAGE.into()));
    };
    if prompt_words.is_empty() {
        return Err(AppError::Usage(USAGE.into()));
    }

    if raw.edit.is_some() && raw.apps_dir.is_none() {
        return Err(AppError::Usage(format!(
            "{FLAG_EDIT} requires {FLAG_APPS_DIR}"
        )));
    }

    let file = load_file_config(raw.config.as_deref(), env, cwd)?;

    let max_turns = config::resolve_positive(
        raw.max_turns.as_deref(),
        FLAG_MAX_TURNS,
        env,
        ENV_MAX_TURNS,
        file.max_turns,
        DEFAULT_MAX_TURNS,
    )?;
    let timeout_ms = config::resolve_positive(
        raw.timeout_ms.as_deref(),
        FLAG_TIMEOUT_MS,
        env,
        ENV_TIMEOUT_MS,
        file.timeout_ms,
        DEFAULT_TIMEOUT_MS,
    )?;
    let model = config::resolve_string(
        raw.model.as_deref(),
        env,
        ENV_MODEL,
        file.model.as_deref(),
        DEFAULT_MODEL,
    );

    let name = name.trim().to_owned();
    let prompt = prompt_words.join(" ").trim().to_owned();
    validate_name_prompt(&name, &prompt)?;

    let mode = match (raw.edit.as_deref(), raw.apps_dir.as_deref()) {
        (Some(edit), Some(apps_dir)) => GenerationMode::Edit(path_safety::validate_edit_target(
            Path::new(apps_dir),
            Path::new(edit),
            cwd,
        )?),
        _ => GenerationMode::Create,
    };

    Ok(ResolvedInvocation {
        request: GenerationRequest {
            name,
            prompt,
            mode,
            model,
            max_turns,
            timeout_ms,
        },
        locator: LocatorConfig {
            configured_path: file.claude_path,
            extra_dirs: file.search_dirs,
        },
    })
}

/// Validate trimmed name and prompt text.
///
/// # Errors
///
/// Returns `AppError::Usage` when either is empty, too long, or contains
/// control characters (the prompt may contain newlines and tabs). Lengths
/// are UTF-8 byte counts, the same measure the host applies when it saves
/// the app.
pub fn validate_name_prompt(name: &str, prompt: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Usage("App name is required".into()));
    }
    if prompt.is_empty() {
        return Err(AppError::Usage("Prompt is required".into()));
    }
    if name.len() > APP_NAME_MAX_LENGTH {
        return Err(AppError::Usage(format!(
            "App name must be at most {APP_NAME_MAX_LENGTH} characters"
        )));
    }
    if prompt.len() > APP_PROMPT_MAX_LENGTH {
        return Err(AppError::Usage(format!(
            "Prompt must be at most {APP_PROMPT_MAX_LENGTH} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(AppError::Usage("App name contains invalid characters".into()));
    }
    if prompt
        .chars()
        .any(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
    {
        return Err(AppError::Usage("Prompt contains invalid characters".into()));
    }
    Ok(())
}

fn load_file_config(flag: Option<&str>, env: &Environment, cwd: &Path) -> Result<FileConfig> {
    let Some(raw_path) = flag
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .or_else(|| env.get(ENV_CONFIG))
    else {
        return Ok(FileConfig::default());
    };
    let path: PathBuf = path_safety::resolve_against(cwd, Path::new(raw_path.trim()));
    FileConfig::load_from_path(path)
}
