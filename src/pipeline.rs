//! End-to-end control flow for one invocation.
//!
//! Every failure, wherever it is raised, converges here into exactly one
//! `ERROR:` line; success has already been written by the session. The
//! returned [`Outcome`] decides the exit status.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use crate::agent::spawner::ClaudeCliRunner;
use crate::agent::{AgentRunner, RunSpec};
use crate::config::Environment;
use crate::locator;
use crate::protocol::{Outcome, ProtocolEmitter};
use crate::request;
use crate::session::{ActiveSession, GenerationSession};
use crate::Result;

/// First progress line, once the request is valid.
pub const STARTING_PROGRESS: &str = "Starting generation...";
/// Progress line when a create-mode run starts.
pub const CREATING_PROGRESS: &str = "Generating app with Claude...";
/// Progress line when an edit-mode run starts.
pub const EDITING_PROGRESS: &str = "Editing app with Claude...";

/// Where the agent runner comes from.
enum RunnerSource<'a> {
    /// Locate the CLI and spawn it.
    Discover,
    /// Use the given runner as-is.
    Provided(&'a dyn AgentRunner),
}

/// Run one invocation against the real agent CLI.
pub async fn run<S, W>(
    args: &[S],
    env: &Environment,
    cwd: &Path,
    active: &ActiveSession,
    out: W,
) -> Outcome
where
    S: AsRef<str>,
    W: Write,
{
    let mut emitter = ProtocolEmitter::new(out);
    let result = generate(args, env, cwd, active, &mut emitter, RunnerSource::Discover).await;
    conclude(&mut emitter, result)
}

/// Run one invocation with a caller-supplied runner; executable discovery
/// is skipped.
pub async fn run_with_runner<S, W>(
    args: &[S],
    env: &Environment,
    cwd: &Path,
    active: &ActiveSession,
    runner: &dyn AgentRunner,
    out: W,
) -> Outcome
where
    S: AsRef<str>,
    W: Write,
{
    let mut emitter = ProtocolEmitter::new(out);
    let result = generate(
        args,
        env,
        cwd,
        active,
        &mut emitter,
        RunnerSource::Provided(runner),
    )
    .await;
    conclude(&mut emitter, result)
}

async fn generate<S, W>(
    args: &[S],
    env: &Environment,
    cwd: &Path,
    active: &ActiveSession,
    emitter: &mut ProtocolEmitter<W>,
    source: RunnerSource<'_>,
) -> Result<()>
where
    S: AsRef<str>,
    W: Write,
{
    let invocation = request::resolve(args, env, cwd)?;
    let request = &invocation.request;
    let editing = request.edit_scope().is_some();
    info!(
        name = %request.name,
        model = %request.model,
        max_turns = request.max_turns,
        timeout_ms = request.timeout_ms,
        editing,
        "request resolved"
    );
    emitter.progress(STARTING_PROGRESS)?;

    let discovered;
    let runner: &dyn AgentRunner = match source {
        RunnerSource::Provided(runner) => runner,
        RunnerSource::Discover => {
            discovered =
                ClaudeCliRunner::new(locator::locate_executable(env, &invocation.locator).await?);
            &discovered
        }
    };

    let mut session = GenerationSession::new(Duration::from_millis(request.timeout_ms));
    let spec = RunSpec::for_request(request, session.id());
    emitter.progress(if editing {
        EDITING_PROGRESS
    } else {
        CREATING_PROGRESS
    })?;

    let span = info_span!("generation", session_id = %session.id(), model = %request.model);
    session
        .run(runner, &spec, active, emitter)
        .instrument(span)
        .await
}

fn conclude<W: Write>(emitter: &mut ProtocolEmitter<W>, result: Result<()>) -> Outcome {
    match result {
        Ok(()) => Outcome::Success,
        Err(err) => {
            warn!(error = %err, pre_spawn = err.is_pre_spawn(), "generation failed");
            if let Err(emit_err) = emitter.emit_error(err.message()) {
                error!(%emit_err, "failed to write error line");
            }
            Outcome::Failure
        }
    }
}
