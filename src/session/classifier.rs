//! Stream event classification.
//!
//! Folds the agent's message stream into the session's payload buffer and
//! reports the one-shot moment the document payload starts to arrive.

use crate::agent::{AgentMessage, ContentBlock};

/// Opening marker of a document.
pub const OPENING_MARKER: &str = "<!DOCTYPE";

/// Progress text announced when the payload starts to arrive.
pub const PAYLOAD_STARTED_PROGRESS: &str = "Receiving HTML content...";

/// Signal produced while classifying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSignal {
    /// The buffer contains the opening marker for the first time.
    PayloadStarted,
}

/// Accumulated stream state for one session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamClassifier {
    buffer: String,
    payload_started: bool,
    failed_result: Option<String>,
}

impl StreamClassifier {
    /// Empty classifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message into the state.
    ///
    /// - `assistant`: every text block is appended in order. The first time the
    ///   buffer then contains [`OPENING_MARKER`], returns
    ///   [`StreamSignal::PayloadStarted`]; this happens at most once.
    /// - `result`: when nothing has been buffered yet, its text becomes the
    ///   buffer, and the same one-shot check runs on it, so a run that only
    ///   answers in its result still announces the payload. An error result
    ///   with no text is remembered instead.
    /// - anything else: no-op.
    pub fn classify(&mut self, message: AgentMessage) -> Option<StreamSignal> {
        match message {
            AgentMessage::Assistant { message } => {
                for block in message.content {
                    if let ContentBlock::Text { text } = block {
                        self.buffer.push_str(&text);
                    }
                }
                self.check_payload_started()
            }
            AgentMessage::Result {
                result,
                is_error,
                subtype,
            } => {
                if self.buffer.is_empty() {
                    match result.filter(|text| !text.is_empty()) {
                        Some(text) => {
                            self.buffer = text;
                            return self.check_payload_started();
                        }
                        None if is_error => {
                            self.failed_result =
                                Some(subtype.unwrap_or_else(|| "unknown error".into()));
                        }
                        None => {}
                    }
                }
                None
            }
            AgentMessage::Other => None,
        }
    }

    /// Accumulated text.
    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Whether the payload-started signal has fired.
    #[must_use]
    pub fn payload_started(&self) -> bool {
        self.payload_started
    }

    /// Subtype of an error `result` received while the buffer was empty.
    #[must_use]
    pub fn failed_result(&self) -> Option<&str> {
        self.failed_result.as_deref()
    }

    /// Consume the classifier, returning the buffer.
    #[must_use]
    pub fn into_buffer(self) -> String {
        self.buffer
    }

    fn check_payload_started(&mut self) -> Option<StreamSignal> {
        if self.payload_started || !self.buffer.contains(OPENING_MARKER) {
            return None;
        }
        self.payload_started = true;
        Some(StreamSignal::PayloadStarted)
    }
}
