use trove_sidecar::agent::{AgentMessage, AssistantPayload, ContentBlock};
use trove_sidecar::session::classifier::{StreamClassifier, StreamSignal};

/// Text blocks append in order; non-text blocks are ignored.
#[test]
fn assistant_text_blocks_append_in_order() {
    let mut classifier = StreamClassifier::new();
    let message = AgentMessage::Assistant {
        message: AssistantPayload {
            content: vec![
                ContentBlock::Text { text: "one ".into() },
                ContentBlock::Other,
                ContentBlock::Text { text: "two".into() },
            ],
        },
    };

    assert_eq!(classifier.classify(message), None);
    assert_eq!(classifier.buffer(), "one two");
}

/// The payload signal fires once, when the marker first appears, even if it
/// straddles two messages.
#[test]
fn payload_started_fires_exactly_once() {
    let mut classifier = StreamClassifier::new();

    assert_eq!(classifier.classify(AgentMessage::assistant_text("Here you go: <!DOC")), None);
    assert!(!classifier.payload_started());

    assert_eq!(
        classifier.classify(AgentMessage::assistant_text("TYPE html><html>")),
        Some(StreamSignal::PayloadStarted)
    );
    assert!(classifier.payload_started());

    assert_eq!(
        classifier.classify(AgentMessage::assistant_text("<!DOCTYPE html>")),
        None,
        "signal must not fire twice"
    );
}

/// The marker match is case-sensitive.
#[test]
fn lowercase_doctype_does_not_signal() {
    let mut classifier = StreamClassifier::new();
    assert_eq!(
        classifier.classify(AgentMessage::assistant_text("<!doctype html>")),
        None
    );
}

/// A result message is adopted only when nothing was streamed before it.
#[test]
fn result_is_fallback_only() {
    let mut empty = StreamClassifier::new();
    assert_eq!(
        empty.classify(AgentMessage::result_text("<!DOCTYPE html><html></html>")),
        Some(StreamSignal::PayloadStarted)
    );
    assert_eq!(empty.buffer(), "<!DOCTYPE html><html></html>");

    let mut streamed = StreamClassifier::new();
    streamed.classify(AgentMessage::assistant_text("streamed"));
    streamed.classify(AgentMessage::result_text("final"));
    assert_eq!(streamed.into_buffer(), "streamed");
}

/// The adopted result only announces the payload when it holds the marker,
/// and a later result never announces it a second time.
#[test]
fn result_fallback_signal_fires_once() {
    let mut plain = StreamClassifier::new();
    assert_eq!(plain.classify(AgentMessage::result_text("no document")), None);
    assert!(!plain.payload_started());

    let mut adopted = StreamClassifier::new();
    assert_eq!(
        adopted.classify(AgentMessage::result_text("<!DOCTYPE html>")),
        Some(StreamSignal::PayloadStarted)
    );
    assert_eq!(adopted.classify(AgentMessage::result_text("<!DOCTYPE html>")), None);
    assert!(adopted.payload_started());
}

/// An error result with no text is remembered by subtype.
#[test]
fn error_result_records_subtype() {
    let mut classifier = StreamClassifier::new();
    classifier.classify(AgentMessage::Result {
        result: None,
        is_error: true,
        subtype: Some("error_max_turns".into()),
    });

    assert_eq!(classifier.failed_result(), Some("error_max_turns"));
    assert_eq!(classifier.buffer(), "");
}

/// Unrecognized messages change nothing.
#[test]
fn other_messages_are_no_ops() {
    let mut classifier = StreamClassifier::new();
    assert_eq!(classifier.classify(AgentMessage::Other), None);
    assert_eq!(classifier, StreamClassifier::new());
}
