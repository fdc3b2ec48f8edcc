//! Unit tests for the agent line codec and the stdout reader task.
//!
//! Covers:
//! - single and batched NDJSON lines
//! - partial delivery buffered until newline
//! - oversize lines dropped without ending the stream
//! - malformed JSON and blank lines skipped by the reader
//! - unknown message and block tags tolerated
//! - EOF closing the channel

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use trove_sidecar::agent::codec::{AgentLineCodec, MAX_LINE_BYTES};
use trove_sidecar::agent::reader::{parse_agent_line, run_reader};
use trove_sidecar::agent::{AgentMessage, AssistantPayload, ContentBlock};
use trove_sidecar::AppError;

// ── Codec ────────────────────────────────────────────────────────────────────

/// A complete line decodes without its trailing newline.
#[test]
fn single_line_decodes() {
    let mut codec = AgentLineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"system\"}\n");

    let line = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(line, Some("{\"type\":\"system\"}".to_owned()));
}

/// Two lines in one buffer decode as two items.
#[test]
fn batched_lines_decode_separately() {
    let mut codec = AgentLineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"a\"}\n{\"type\":\"b\"}\n");

    let first = codec.decode(&mut buf).expect("first decode");
    let second = codec.decode(&mut buf).expect("second decode");
    let third = codec.decode(&mut buf).expect("third decode");

    assert_eq!(first.as_deref(), Some("{\"type\":\"a\"}"));
    assert_eq!(second.as_deref(), Some("{\"type\":\"b\"}"));
    assert_eq!(third, None, "buffer must be drained");
}

/// A partial line waits for its newline.
#[test]
fn partial_line_is_buffered() {
    let mut codec = AgentLineCodec::new();
    let mut buf = BytesMut::from("{\"type\":");

    assert_eq!(codec.decode(&mut buf).expect("partial decode"), None);

    buf.extend_from_slice(b"\"result\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("completed decode").as_deref(),
        Some("{\"type\":\"result\"}")
    );
}

/// An oversize line is dropped and decoding resumes at the next line.
#[test]
fn oversize_line_is_skipped() {
    let mut codec = AgentLineCodec::with_max_length(16);
    let mut buf = BytesMut::from("{\"type\":\"assistant\",\"padding\":\"xxxxxxxx\"}\n{\"type\":\"b\"}\n");

    let line = codec.decode(&mut buf).expect("oversize line must not fail");

    assert_eq!(line.as_deref(), Some("{\"type\":\"b\"}"));
    assert_eq!(codec.decode(&mut buf).expect("drained decode"), None);
}

/// An oversize line arriving in pieces is dropped once its newline shows up.
#[test]
fn oversize_line_split_across_reads_is_skipped() {
    let mut codec = AgentLineCodec::with_max_length(8);
    let mut buf = BytesMut::from("xxxxxxxxxxxxxxxxxxxx");

    assert_eq!(codec.decode(&mut buf).expect("first chunk"), None);

    buf.extend_from_slice(b"xxxx\nok\n");
    assert_eq!(codec.decode(&mut buf).expect("second chunk").as_deref(), Some("ok"));
}

/// An unterminated oversize tail at EOF yields nothing.
#[test]
fn oversize_tail_at_eof_is_dropped() {
    let mut codec = AgentLineCodec::with_max_length(8);
    let mut buf = BytesMut::from("xxxxxxxxxxxxxxxxxxxx");

    assert_eq!(codec.decode_eof(&mut buf).expect("eof decode"), None);
}

/// The default cap is 16 MiB.
#[test]
fn default_cap_is_sixteen_mebibytes() {
    assert_eq!(MAX_LINE_BYTES, 16 * 1024 * 1024);
}

// ── Line parsing ─────────────────────────────────────────────────────────────

/// Assistant text blocks decode in order; other block kinds are tolerated.
#[test]
fn assistant_message_parses_blocks() {
    let line = r#"{"type":"assistant","message":{"id":"m1","content":[{"type":"text","text":"<!DOCTYPE html>"},{"type":"tool_use","id":"t1","name":"Read","input":{}},{"type":"text","text":"<html>"}]}}"#;

    let message = parse_agent_line(line).expect("parse").expect("message");

    assert_eq!(
        message,
        AgentMessage::Assistant {
            message: AssistantPayload {
                content: vec![
                    ContentBlock::Text {
                        text: "<!DOCTYPE html>".into()
                    },
                    ContentBlock::Other,
                    ContentBlock::Text {
                        text: "<html>".into()
                    },
                ],
            },
        }
    );
}

/// Result messages carry the final text, error flag, and subtype.
#[test]
fn result_message_parses_fields() {
    let line = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"duration_ms":10}"#;

    let message = parse_agent_line(line).expect("parse").expect("message");

    assert_eq!(
        message,
        AgentMessage::Result {
            result: None,
            is_error: true,
            subtype: Some("error_max_turns".into()),
        }
    );
}

/// Unknown message tags decode as `Other`.
#[test]
fn unknown_tag_is_other() {
    let line = r#"{"type":"system","subtype":"init","session_id":"abc"}"#;
    assert_eq!(
        parse_agent_line(line).expect("parse"),
        Some(AgentMessage::Other)
    );
}

/// Blank lines are not messages; garbage is an upstream error.
#[test]
fn blank_and_malformed_lines() {
    assert_eq!(parse_agent_line("   ").expect("blank parse"), None);

    let err = parse_agent_line("not json").expect_err("garbage must fail");
    assert!(
        matches!(&err, AppError::Upstream(msg) if msg.starts_with("malformed agent message")),
        "unexpected error: {err:?}"
    );
}

// ── Reader task ──────────────────────────────────────────────────────────────

/// The reader forwards good lines, skips bad ones, and closes on EOF.
#[tokio::test]
async fn reader_forwards_messages_until_eof() {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let (tx, mut rx) = mpsc::channel(8);
    let task = tokio::spawn(run_reader(
        "test-session".into(),
        reader,
        tx,
        CancellationToken::new(),
    ));

    let stream = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\"}\n",
        "this is not json\n",
        "\n",
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n",
        "{\"type\":\"result\",\"result\":\"hi\",\"is_error\":false}\n",
    );
    writer.write_all(stream.as_bytes()).await.expect("write");
    drop(writer);

    let mut received = Vec::new();
    while let Some(item) = rx.recv().await {
        received.push(item.expect("no stream error expected"));
    }

    assert_eq!(
        received,
        vec![
            AgentMessage::Other,
            AgentMessage::assistant_text("hi"),
            AgentMessage::Result {
                result: Some("hi".into()),
                is_error: false,
                subtype: None,
            },
        ]
    );
    task.await.expect("join").expect("reader result");
}

/// Cancellation stops the reader even while the stream stays open.
#[tokio::test]
async fn reader_stops_on_cancel() {
    let (_writer, reader) = tokio::io::duplex(64);
    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_reader("test-session".into(), reader, tx, cancel.clone()));

    cancel.cancel();

    task.await.expect("join").expect("reader result");
    assert!(rx.recv().await.is_none(), "channel must close after cancel");
}

/// A line over the cap does not end the stream; the next message still
/// reaches the channel.
#[tokio::test]
async fn reader_survives_oversize_line() {
    let mut stream = "x".repeat(MAX_LINE_BYTES + 10);
    stream.push('\n');
    stream.push_str(
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"after\"}]}}\n",
    );
    let (tx, mut rx) = mpsc::channel(8);

    run_reader(
        "test-session".into(),
        std::io::Cursor::new(stream.into_bytes()),
        tx,
        CancellationToken::new(),
    )
    .await
    .expect("reader result");

    let mut received = Vec::new();
    while let Some(item) = rx.recv().await {
        received.push(item.expect("no stream error expected"));
    }
    assert_eq!(received, vec![AgentMessage::assistant_text("after")]);
}
