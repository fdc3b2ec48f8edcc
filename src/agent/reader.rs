//! Agent stdout reader task.
//!
//! Reads newline-delimited JSON from the agent's stdout through
//! [`AgentLineCodec`], decodes each line into an [`AgentMessage`], and sends
//! it through a bounded [`mpsc`] channel. Backpressure is natural: when the
//! consumer falls behind, `send` suspends and the reader stops pulling bytes.
//!
//! | Input                          | Effect                                  |
//! |--------------------------------|-----------------------------------------|
//! | blank line                     | skipped                                 |
//! | valid JSON, known `type`       | forwarded                               |
//! | valid JSON, unknown `type`     | forwarded as [`AgentMessage::Other`]    |
//! | invalid JSON / oversize line   | logged at `WARN`, skipped               |
//! | I/O error                      | forwarded as `Err`, reader stops        |
//! | EOF                            | reader stops, channel closes            |

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::agent::codec::AgentLineCodec;
use crate::agent::{AgentMessage, RunItem};
use crate::{AppError, Result};

/// Decode one line of agent output.
///
/// # Return value
///
/// - `Ok(Some(message))` for any JSON object with a `type` tag.
/// - `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns `AppError::Upstream("malformed agent message: …")` when the line
/// is not a JSON object with a string `type` field.
pub fn parse_agent_line(line: &str) -> Result<Option<AgentMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|err| AppError::Upstream(format!("malformed agent message: {err}")))
}

/// Reader task: frame and decode `stdout`, forwarding messages to `message_tx`.
///
/// Exits on EOF, on an I/O error (after forwarding it), when `cancel` fires,
/// or when the receiving side is gone. Dropping `message_tx` on exit is what
/// signals natural end of stream to the consumer.
///
/// # Errors
///
/// Always returns `Ok(())`; stream failures travel through the channel.
pub async fn run_reader<R>(
    session_id: String,
    stdout: R,
    message_tx: mpsc::Sender<RunItem>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, AgentLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "agent reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "agent reader: EOF");
                        break;
                    }

                    Some(Err(err)) => {
                        warn!(session_id, error = %err, "agent reader: stream error, stopping");
                        let failure = AppError::Upstream(format!("Agent stream failed: {}", err.message()));
                        // The consumer may already be gone; nothing left to report to.
                        let _ = message_tx.send(Err(failure)).await;
                        break;
                    }

                    Some(Ok(line)) => match parse_agent_line(&line) {
                        Ok(Some(message)) => {
                            trace!(session_id, ?message, "agent reader: message decoded");
                            if message_tx.send(Ok(message)).await.is_err() {
                                debug!(session_id, "agent reader: consumer closed, stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(
                                session_id,
                                error = %err,
                                raw_line = %truncate_for_log(&line),
                                "agent reader: parse error, skipping line"
                            );
                        }
                    },
                }
            }
        }
    }

    Ok(())
}

fn truncate_for_log(line: &str) -> &str {
    const LIMIT: usize = 200;
    if line.len() <= LIMIT {
        return line;
    }
    let mut end = LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
