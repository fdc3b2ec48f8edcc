//! Generation session: one agent run from spawn to emitted document.
//!
//! The session drains the run's message channel from a single loop that
//! suspends once per message and races three things: the abort signal, the
//! deadline, and the next message. Whatever ends the loop, the run is closed
//! and the [`ActiveSession`] slot is released before the session moves on.
//!
//! Phases: `Init → Streaming → Extracting → Validating → Injecting →
//! Emitting → Done`, with `Failed` and `Cancelled` reachable from any of them.

pub mod classifier;

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentRunner, RunExit, RunSpec};
use crate::output::{inject_storage_bridge, normalize};
use crate::protocol::ProtocolEmitter;
use crate::{AppError, Result};

use self::classifier::{StreamClassifier, StreamSignal, PAYLOAD_STARTED_PROGRESS};

/// Largest accumulated payload accepted from the agent.
pub const MAX_HTML_BYTES: usize = 10 * 1024 * 1024;

/// Error text when the payload cap is exceeded.
pub const SIZE_LIMIT_MESSAGE: &str = "Generated HTML exceeded size limit";

/// Error text for an externally cancelled run.
pub const CANCELLED_MESSAGE: &str = "Generation cancelled";

/// Error text when a second session is started while one is live.
pub const ALREADY_RUNNING_MESSAGE: &str = "Another generation is already running";

/// Progress text announced once streaming has finished.
pub const VALIDATING_PROGRESS: &str = "Validating HTML...";

// ── Phases ───────────────────────────────────────────────────────────────────

/// Lifecycle phase of a [`GenerationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, run not started yet.
    Init,
    /// Draining the agent's message stream.
    Streaming,
    /// Stream ended naturally; waiting on the agent's exit.
    Extracting,
    /// Normalizing and checking the document.
    Validating,
    /// Splicing in the storage bridge.
    Injecting,
    /// Writing the success sequence.
    Emitting,
    /// Document emitted.
    Done,
    /// Ended with an error.
    Failed,
    /// Ended by an external cancellation request.
    Cancelled,
}

impl SessionPhase {
    /// Whether the phase ends the session.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Determine whether a transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Self::Failed | Self::Cancelled)
                | (Self::Init, Self::Streaming)
                | (Self::Streaming, Self::Extracting)
                | (Self::Extracting, Self::Validating)
                | (Self::Validating, Self::Injecting)
                | (Self::Injecting, Self::Emitting)
                | (Self::Emitting, Self::Done)
        )
    }
}

// ── Active session slot ──────────────────────────────────────────────────────

#[derive(Debug)]
struct LiveSession {
    id: Uuid,
    abort: CancellationToken,
}

/// Out-of-band handle to the live session, if any.
///
/// Cloned into the signal task so an interrupt can cancel whatever run is
/// in flight. At most one session may be installed at a time.
#[derive(Debug, Clone, Default)]
pub struct ActiveSession {
    slot: Arc<Mutex<Option<LiveSession>>>,
}

impl ActiveSession {
    /// Empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session. The returned guard clears the slot on drop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Upstream` if another session is already installed.
    pub fn install(&self, id: Uuid, abort: CancellationToken) -> Result<ActiveSlot> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(AppError::Upstream(ALREADY_RUNNING_MESSAGE.into()));
        }
        *slot = Some(LiveSession { id, abort });
        Ok(ActiveSlot {
            owner: self.clone(),
            id,
        })
    }

    /// Fire the live session's abort signal. Returns whether one was live.
    pub fn request_cancel(&self) -> bool {
        let slot = self.lock();
        match slot.as_ref() {
            Some(live) => {
                info!(session_id = %live.id, "cancellation requested");
                live.abort.cancel();
                true
            }
            None => false,
        }
    }

    /// Identifier of the live session.
    #[must_use]
    pub fn current(&self) -> Option<Uuid> {
        self.lock().as_ref().map(|live| live.id)
    }

    fn lock(&self) -> MutexGuard<'_, Option<LiveSession>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard returned by [`ActiveSession::install`].
#[derive(Debug)]
#[must_use = "dropping the guard releases the slot immediately"]
pub struct ActiveSlot {
    owner: ActiveSession,
    id: Uuid,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut slot = self.owner.lock();
        if slot.as_ref().is_some_and(|live| live.id == self.id) {
            *slot = None;
            debug!(session_id = %self.id, "active session cleared");
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Why the streaming loop stopped.
#[derive(Debug)]
enum StreamEnd {
    Completed,
    TimedOut,
    Cancelled,
    Failed(AppError),
}

/// One generation from agent spawn to emitted document.
#[derive(Debug)]
pub struct GenerationSession {
    id: Uuid,
    timeout: Duration,
    phase: SessionPhase,
    abort: CancellationToken,
}

impl GenerationSession {
    /// New session with the given time budget for the streaming phase.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            timeout,
            phase: SessionPhase::Init,
            abort: CancellationToken::new(),
        }
    }

    /// Session identifier, also used as the run's log identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run the session to completion, writing progress and, on success, the
    /// document through `emitter`. The caller owns error emission.
    ///
    /// # Errors
    ///
    /// - `AppError::Upstream` if the run cannot start, fails mid-stream, or
    ///   ends without output, or if another session is live.
    /// - `AppError::Timeout` when the deadline passes first.
    /// - `AppError::Cancelled` on an external cancellation request.
    /// - `AppError::MalformedOutput` when the output fails validation.
    pub async fn run<W: Write>(
        &mut self,
        runner: &dyn AgentRunner,
        spec: &RunSpec,
        active: &ActiveSession,
        emitter: &mut ProtocolEmitter<W>,
    ) -> Result<()> {
        let result = self.drive(runner, spec, active, emitter).await;
        if let Err(err) = &result {
            let next = if matches!(err, AppError::Cancelled(_)) {
                SessionPhase::Cancelled
            } else {
                SessionPhase::Failed
            };
            self.transition(next);
            info!(session_id = %self.id, error = %err, "generation failed");
        }
        result
    }

    async fn drive<W: Write>(
        &mut self,
        runner: &dyn AgentRunner,
        spec: &RunSpec,
        active: &ActiveSession,
        emitter: &mut ProtocolEmitter<W>,
    ) -> Result<()> {
        let raw = self.stream(runner, spec, active, emitter).await?;

        self.transition(SessionPhase::Validating);
        emitter.progress(VALIDATING_PROGRESS)?;
        let document = normalize(&raw)?;

        self.transition(SessionPhase::Injecting);
        let document = inject_storage_bridge(&document);

        self.transition(SessionPhase::Emitting);
        emitter.emit_document(&document)?;

        self.transition(SessionPhase::Done);
        info!(session_id = %self.id, bytes = document.len(), "generation complete");
        Ok(())
    }

    /// Streaming phase. Returns the raw accumulated text.
    async fn stream<W: Write>(
        &mut self,
        runner: &dyn AgentRunner,
        spec: &RunSpec,
        active: &ActiveSession,
        emitter: &mut ProtocolEmitter<W>,
    ) -> Result<String> {
        // Released on every exit path, panics included.
        let _slot = active.install(self.id, self.abort.clone())?;

        let mut run = runner.start(spec, self.abort.clone())?;
        self.transition(SessionPhase::Streaming);

        let abort = self.abort.clone();
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut classifier = StreamClassifier::new();
        let end = loop {
            tokio::select! {
                biased;
                () = abort.cancelled() => break StreamEnd::Cancelled,
                () = &mut deadline => break StreamEnd::TimedOut,
                item = run.next_message() => match item {
                    None => break StreamEnd::Completed,
                    Some(Err(err)) => break StreamEnd::Failed(err),
                    Some(Ok(message)) => {
                        if classifier.classify(message) == Some(StreamSignal::PayloadStarted) {
                            debug!(session_id = %self.id, "payload started");
                            if let Err(err) = emitter.progress(PAYLOAD_STARTED_PROGRESS) {
                                break StreamEnd::Failed(err);
                            }
                        }
                        if classifier.buffer().len() > MAX_HTML_BYTES {
                            break StreamEnd::Failed(AppError::MalformedOutput(
                                SIZE_LIMIT_MESSAGE.into(),
                            ));
                        }
                    }
                },
            }
        };

        match end {
            StreamEnd::Completed => {
                self.transition(SessionPhase::Extracting);
                let exit = run.finish().await;
                check_completion(self.id, &classifier, exit)?;
                Ok(classifier.into_buffer())
            }
            StreamEnd::TimedOut => {
                // Measured before teardown; closing may wait out the kill grace.
                let elapsed_ms = started.elapsed().as_millis();
                abort.cancel();
                run.close().await;
                let seconds = (elapsed_ms + 500) / 1000;
                warn!(session_id = %self.id, elapsed_ms, "generation timed out");
                Err(AppError::Timeout(format!(
                    "Generation timed out after {seconds}s"
                )))
            }
            StreamEnd::Cancelled => {
                run.close().await;
                Err(AppError::Cancelled(CANCELLED_MESSAGE.into()))
            }
            StreamEnd::Failed(err) => {
                abort.cancel();
                run.close().await;
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: SessionPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(session_id = %self.id, from = ?self.phase, to = ?next, "unexpected session phase transition");
        }
        debug!(session_id = %self.id, from = ?self.phase, to = ?next, "session phase");
        self.phase = next;
    }
}

/// Decide whether a naturally ended stream produced anything usable.
fn check_completion(session_id: Uuid, classifier: &StreamClassifier, exit: RunExit) -> Result<()> {
    if !classifier.buffer().trim().is_empty() {
        if let RunExit::Failed { code, .. } = exit {
            warn!(%session_id, ?code, "agent exited unsuccessfully after producing output");
        }
        return Ok(());
    }

    if let Some(subtype) = classifier.failed_result() {
        return Err(AppError::Upstream(format!(
            "Claude Code run failed: {subtype}"
        )));
    }

    match exit {
        RunExit::Success => Ok(()),
        RunExit::Failed { code, detail } => Err(AppError::Upstream(describe_exit(code, detail))),
    }
}

fn describe_exit(code: Option<i32>, detail: Option<String>) -> String {
    let status = code.map_or_else(
        || "Claude Code was terminated".to_owned(),
        |code| format!("Claude Code exited with status {code}"),
    );
    match detail {
        Some(detail) => format!("{status}: {detail}"),
        None => status,
    }
}
