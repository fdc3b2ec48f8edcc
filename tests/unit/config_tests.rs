use trove_sidecar::config::{
    self, Environment, FileConfig, LogFormat, DEFAULT_MAX_TURNS, ENV_LOG_FORMAT, ENV_MAX_TURNS,
    ENV_MODEL,
};
use trove_sidecar::AppError;

// ── Environment snapshot ─────────────────────────────────────────────────────

/// Blank and whitespace-only values read as unset.
#[test]
fn blank_environment_values_are_absent() {
    let env = Environment::from_pairs([("A", ""), ("B", "   "), ("C", "value")]);

    assert_eq!(env.get("A"), None);
    assert_eq!(env.get("B"), None);
    assert_eq!(env.get("C"), Some("value"));
    assert_eq!(env.get("MISSING"), None);
}

/// `with` overrides an existing key without touching the others.
#[test]
fn with_overrides_single_key() {
    let env = Environment::from_pairs([("A", "1"), ("B", "2")]).with("A", "3");

    assert_eq!(env.get("A"), Some("3"));
    assert_eq!(env.get("B"), Some("2"));
    assert_eq!(env.iter().count(), 2);
}

// ── Config file ──────────────────────────────────────────────────────────────

/// A full config file parses every field.
#[test]
fn config_file_parses_all_fields() {
    let toml = r#"
model = "opus"
max_turns = 5
timeout_ms = 240000
claude_path = "/opt/claude/bin/claude"
search_dirs = ["/opt/tools/bin", "/srv/bin"]
"#;
    let config = FileConfig::from_toml_str(toml).expect("valid config");

    assert_eq!(config.model.as_deref(), Some("opus"));
    assert_eq!(config.max_turns, Some(5));
    assert_eq!(config.timeout_ms, Some(240_000));
    assert_eq!(
        config.claude_path.as_deref(),
        Some(std::path::Path::new("/opt/claude/bin/claude"))
    );
    assert_eq!(config.search_dirs.len(), 2);
}

/// An empty file is valid and leaves everything unset.
#[test]
fn empty_config_file_is_default() {
    let config = FileConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, FileConfig::default());
}

/// Unknown keys are rejected.
#[test]
fn unknown_config_key_is_rejected() {
    let result = FileConfig::from_toml_str("modle = \"opus\"\n");
    assert!(
        matches!(result, Err(AppError::Config(_))),
        "typo'd key must be a config error, got {result:?}"
    );
}

/// Zero turn budgets and timeouts are rejected.
#[test]
fn zero_values_in_config_are_rejected() {
    let turns = FileConfig::from_toml_str("max_turns = 0\n");
    assert!(matches!(turns, Err(AppError::Config(msg)) if msg.contains("max_turns")));

    let timeout = FileConfig::from_toml_str("timeout_ms = 0\n");
    assert!(matches!(timeout, Err(AppError::Config(msg)) if msg.contains("timeout_ms")));
}

/// Negative numbers do not fit the unsigned fields.
#[test]
fn negative_values_in_config_are_rejected() {
    let result = FileConfig::from_toml_str("max_turns = -2\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

/// A missing file is a config error naming the path.
#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");

    let err = FileConfig::load_from_path(&path).expect_err("missing file must fail");
    match err {
        AppError::Config(msg) => assert!(msg.contains("absent.toml"), "message: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

// ── Precedence ───────────────────────────────────────────────────────────────

/// Positive integer parsing rejects zero, negatives, and garbage.
#[test]
fn parse_positive_accepts_only_positive_integers() {
    assert_eq!(config::parse_positive::<u32>("7"), Some(7));
    assert_eq!(config::parse_positive::<u32>(" 12 "), Some(12));
    assert_eq!(config::parse_positive::<u32>("0"), None);
    assert_eq!(config::parse_positive::<u32>("-1"), None);
    assert_eq!(config::parse_positive::<u32>("1.5"), None);
    assert_eq!(config::parse_positive::<u64>("abc"), None);
}

/// Flag beats environment beats file beats default.
#[test]
fn positive_tunable_follows_precedence() {
    let env = Environment::from_pairs([(ENV_MAX_TURNS, "4")]);
    let empty = Environment::default();

    let from_flag = config::resolve_positive(Some("9"), "--max-turns", &env, ENV_MAX_TURNS, Some(6), DEFAULT_MAX_TURNS);
    assert_eq!(from_flag, Ok(9));

    let from_env = config::resolve_positive(None, "--max-turns", &env, ENV_MAX_TURNS, Some(6), DEFAULT_MAX_TURNS);
    assert_eq!(from_env, Ok(4));

    let from_file = config::resolve_positive(None, "--max-turns", &empty, ENV_MAX_TURNS, Some(6), DEFAULT_MAX_TURNS);
    assert_eq!(from_file, Ok(6));

    let from_default = config::resolve_positive(None, "--max-turns", &empty, ENV_MAX_TURNS, None, DEFAULT_MAX_TURNS);
    assert_eq!(from_default, Ok(DEFAULT_MAX_TURNS));
}

/// A bad environment value names the variable, not the flag.
#[test]
fn invalid_environment_value_names_variable() {
    let env = Environment::from_pairs([(ENV_MAX_TURNS, "zero")]);

    let result = config::resolve_positive::<u32>(None, "--max-turns", &env, ENV_MAX_TURNS, None, 3);

    assert_eq!(
        result,
        Err(AppError::Usage(format!("{ENV_MAX_TURNS} must be a positive integer")))
    );
}

/// String tunables skip blank flags and fall through.
#[test]
fn string_tunable_follows_precedence() {
    let env = Environment::from_pairs([(ENV_MODEL, "haiku")]);

    assert_eq!(
        config::resolve_string(Some("opus"), &env, ENV_MODEL, Some("file"), "sonnet"),
        "opus"
    );
    assert_eq!(
        config::resolve_string(Some("  "), &env, ENV_MODEL, Some("file"), "sonnet"),
        "haiku"
    );
    assert_eq!(
        config::resolve_string(None, &Environment::default(), ENV_MODEL, Some("file"), "sonnet"),
        "file"
    );
    assert_eq!(
        config::resolve_string(None, &Environment::default(), ENV_MODEL, None, "sonnet"),
        "sonnet"
    );
}

// ── Log format ───────────────────────────────────────────────────────────────

/// Log format defaults to text and parses case-insensitively.
#[test]
fn log_format_from_environment() {
    assert_eq!(LogFormat::from_env(&Environment::default()), Ok(LogFormat::Text));

    let json = Environment::from_pairs([(ENV_LOG_FORMAT, "JSON")]);
    assert_eq!(LogFormat::from_env(&json), Ok(LogFormat::Json));

    let bad = Environment::from_pairs([(ENV_LOG_FORMAT, "xml")]);
    assert!(matches!(LogFormat::from_env(&bad), Err(AppError::Config(_))));
}
