#![forbid(unsafe_code)]

//! `trove-sidecar` binary.
//!
//! Usage: `trove-sidecar <name> <prompt...> [--edit <path> --apps-dir <dir>]`.
//! Speaks the line protocol on stdout, logs to stderr, and exits 0 on
//! success or 1 on any error. `SIGINT`/`SIGTERM` cancel a running generation.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use trove_sidecar::config::{Environment, LogFormat};
use trove_sidecar::pipeline;
use trove_sidecar::protocol::{Outcome, ProtocolEmitter};
use trove_sidecar::session::ActiveSession;
use trove_sidecar::{AppError, Result};

fn main() -> ExitCode {
    let env = Environment::from_process();

    let log_format = LogFormat::from_env(&env);
    if let Err(err) = init_tracing(log_format.as_ref().copied().unwrap_or_default()) {
        eprintln!("{err}");
    }
    if let Err(err) = log_format {
        warn!(%err, "falling back to text logs");
    }

    let args: Vec<String> = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let message = format!("Failed to start runtime: {err}");
            if let Err(emit_err) = ProtocolEmitter::new(std::io::stdout()).emit_error(&message) {
                eprintln!("{emit_err}");
            }
            return ExitCode::from(Outcome::Failure.exit_code());
        }
    };

    let outcome = runtime.block_on(async move {
        let active = ActiveSession::new();
        let signals = tokio::spawn(cancel_on_signal(active.clone()));
        let outcome = pipeline::run(&args, &env, &cwd, &active, std::io::stdout()).await;
        signals.abort();
        outcome
    });

    info!(?outcome, "trove-sidecar finished");
    ExitCode::from(outcome.exit_code())
}

/// Cancel the live generation on every interrupt or termination signal.
async fn cancel_on_signal(active: ActiveSession) {
    while next_signal().await {
        if active.request_cancel() {
            info!("signal received, cancelling generation");
        } else {
            info!("signal received with no generation running");
        }
    }
}

/// Wait for `SIGINT` or `SIGTERM`. Returns `false` once no handler can be
/// installed.
async fn next_signal() -> bool {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    res = ctrl_c => res.is_ok(),
                    received = sigterm.recv() => received.is_some(),
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                ctrl_c.await.is_ok()
            }
        }
    }

    #[cfg(not(unix))]
    {
        match ctrl_c.await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "ctrl-c signal handler failed");
                false
            }
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
