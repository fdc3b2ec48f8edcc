//! Line protocol spoken to the host on stdout.
//!
//! | Line               | Meaning                                         |
//! |--------------------|-------------------------------------------------|
//! | `PROGRESS:<text>`  | status update, any number before the terminal   |
//! | `HTML_START`       | document payload begins                         |
//! | *(document)*       | raw document, may span many lines               |
//! | `HTML_END`         | document payload ends                           |
//! | `ERROR:<text>`     | terminal failure, always the last line          |
//!
//! A successful run is `PROGRESS*, HTML_START, <document>, HTML_END,
//! PROGRESS:Done!` and exits 0. A failed run is `PROGRESS*, ERROR:<text>`
//! and exits 1. [`ProtocolEmitter`] refuses any other order.

use std::io::Write;

use crate::{AppError, Result};

/// Payload start marker line.
pub const HTML_START: &str = "HTML_START";
/// Payload end marker line.
pub const HTML_END: &str = "HTML_END";
/// Progress line prefix.
pub const PROGRESS_PREFIX: &str = "PROGRESS:";
/// Error line prefix.
pub const ERROR_PREFIX: &str = "ERROR:";
/// Progress text emitted after the payload.
pub const DONE: &str = "Done!";

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Status update.
    Progress(String),
    /// Payload begins.
    HtmlStart,
    /// The document itself.
    HtmlBody(String),
    /// Payload ends.
    HtmlEnd,
    /// Terminal failure.
    Error(String),
}

/// Which terminal shape a run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The full success sequence was emitted.
    Success,
    /// An error line was emitted.
    Failure,
}

impl Outcome {
    /// Process exit status for this outcome.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

/// Emission progress, used to reject out-of-order events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Open,
    PayloadStarted,
    PayloadWritten,
    PayloadClosed,
    Finished,
}

/// Serializes [`ProtocolEvent`]s to a writer, one flush per event.
#[derive(Debug)]
pub struct ProtocolEmitter<W: Write> {
    out: W,
    stage: Stage,
}

impl<W: Write> ProtocolEmitter<W> {
    /// Emitter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            stage: Stage::Open,
        }
    }

    /// Write one event.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if writing or flushing fails.
    /// - `AppError::Upstream` if the event would break the sequence rules;
    ///   nothing is written in that case.
    pub fn emit(&mut self, event: &ProtocolEvent) -> Result<()> {
        let next = self.next_stage(event).ok_or_else(|| {
            AppError::Upstream(format!(
                "protocol event {event:?} is not allowed after {:?}",
                self.stage
            ))
        })?;

        match event {
            ProtocolEvent::Progress(text) => {
                writeln!(self.out, "{PROGRESS_PREFIX}{}", single_line(text))?;
            }
            ProtocolEvent::HtmlStart => writeln!(self.out, "{HTML_START}")?,
            ProtocolEvent::HtmlBody(document) => {
                self.out.write_all(document.as_bytes())?;
                if !document.ends_with('\n') {
                    self.out.write_all(b"\n")?;
                }
            }
            ProtocolEvent::HtmlEnd => writeln!(self.out, "{HTML_END}")?,
            ProtocolEvent::Error(text) => {
                writeln!(self.out, "{ERROR_PREFIX}{}", single_line(text))?;
            }
        }
        self.out.flush()?;

        self.stage = next;
        Ok(())
    }

    /// Convenience for a progress event.
    ///
    /// # Errors
    ///
    /// See [`ProtocolEmitter::emit`].
    pub fn progress(&mut self, text: &str) -> Result<()> {
        self.emit(&ProtocolEvent::Progress(text.to_owned()))
    }

    /// Emit the whole success tail: start marker, document, end marker, and
    /// the final `Done!` progress line.
    ///
    /// # Errors
    ///
    /// See [`ProtocolEmitter::emit`].
    pub fn emit_document(&mut self, document: &str) -> Result<()> {
        self.emit(&ProtocolEvent::HtmlStart)?;
        self.emit(&ProtocolEvent::HtmlBody(document.to_owned()))?;
        self.emit(&ProtocolEvent::HtmlEnd)?;
        self.emit(&ProtocolEvent::Progress(DONE.to_owned()))
    }

    /// Emit the terminal error line.
    ///
    /// # Errors
    ///
    /// See [`ProtocolEmitter::emit`].
    pub fn emit_error(&mut self, message: &str) -> Result<()> {
        self.emit(&ProtocolEvent::Error(message.to_owned()))
    }

    /// Whether a terminal event has been written.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn next_stage(&self, event: &ProtocolEvent) -> Option<Stage> {
        match (self.stage, event) {
            (Stage::Open, ProtocolEvent::Progress(_)) => Some(Stage::Open),
            (Stage::Open, ProtocolEvent::HtmlStart) => Some(Stage::PayloadStarted),
            (Stage::Open, ProtocolEvent::Error(_)) => Some(Stage::Finished),
            (Stage::PayloadStarted, ProtocolEvent::HtmlBody(_)) => Some(Stage::PayloadWritten),
            (Stage::PayloadWritten, ProtocolEvent::HtmlEnd) => Some(Stage::PayloadClosed),
            (Stage::PayloadClosed, ProtocolEvent::Progress(text)) if text == DONE => {
                Some(Stage::Finished)
            }
            _ => None,
        }
    }
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
