//! Line codec for the agent's streaming-JSON stdout.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or runaway line cannot grow the read buffer without bound.
//! A single `assistant` message can hold an entire generated document, so the
//! cap is generous.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use trove_sidecar::agent::codec::AgentLineCodec;
//!
//! let lines = FramedRead::new(child_stdout, AgentLineCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted line length: 16 MiB.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Newline-delimited UTF-8 decoder with a [`MAX_LINE_BYTES`] cap.
///
/// An oversize line is logged and dropped inside the codec: `LinesCodec`
/// discards up to the next newline and decoding resumes there, so the framed
/// stream never sees an error for it. I/O failures map to [`AppError::Io`].
#[derive(Debug)]
pub struct AgentLineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl AgentLineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn skip_oversize(&self) {
        warn!(
            max_length = self.max_length,
            "agent line exceeded the line limit, skipping"
        );
    }
}

impl Default for AgentLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skip_oversize(),
                other => return other.map_err(map_io_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => self.skip_oversize(),
                other => return other.map_err(map_io_error),
            }
        }
    }
}

fn map_io_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Upstream("agent line exceeded the line limit".into())
        }
    }
}
