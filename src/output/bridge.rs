//! Storage bridge injection.
//!
//! Generated documents run sandboxed and cannot touch browser storage or the
//! filesystem. The injected script gives them `window.troveStorage`, which
//! posts `{type: "trove-storage-request", requestId, action, key, value}` to
//! the embedding window and resolves when a matching
//! `{type: "trove-storage-response", requestId, value, error}` arrives, or
//! rejects after [`REQUEST_TIMEOUT_MS`].

/// Attribute marking the injected script block.
pub const BRIDGE_ATTRIBUTE: &str = "data-trove-storage-bridge";

/// How long a storage request waits for the host's answer.
pub const REQUEST_TIMEOUT_MS: u64 = 5000;

const SCRIPT_SOURCE: &str = include_str!("storage_bridge.js");

const HEAD_CLOSE: &str = "</head>";
const SCRIPT_CLOSE: &str = "</script>";

/// The complete script block that gets injected.
#[must_use]
pub fn bridge_script() -> String {
    format!("<script {BRIDGE_ATTRIBUTE}>\n{SCRIPT_SOURCE}</script>\n")
}

/// Splice the storage bridge in front of the first `</head>` (any case).
///
/// A document without a head-close tag is returned unchanged. Otherwise any
/// previously injected bridge block is removed first, so the result holds
/// exactly one.
#[must_use]
pub fn inject_storage_bridge(document: &str) -> String {
    if find_ignore_case(document, HEAD_CLOSE, 0).is_none() {
        return document.to_owned();
    }

    let cleaned = strip_bridge_blocks(document);
    let Some(head_close) = find_ignore_case(&cleaned, HEAD_CLOSE, 0) else {
        return cleaned;
    };

    let script = bridge_script();
    let mut injected = String::with_capacity(cleaned.len() + script.len());
    injected.push_str(&cleaned[..head_close]);
    injected.push_str(&script);
    injected.push_str(&cleaned[head_close..]);
    injected
}

/// Remove every previously injected bridge block.
#[must_use]
pub fn strip_bridge_blocks(document: &str) -> String {
    let opening = format!("<script {BRIDGE_ATTRIBUTE}");
    let mut remaining = document;
    let mut stripped = String::with_capacity(document.len());

    while let Some(start) = find_ignore_case(remaining, &opening, 0) {
        let Some(close) = find_ignore_case(remaining, SCRIPT_CLOSE, start) else {
            break;
        };
        let mut end = close + SCRIPT_CLOSE.len();
        if remaining[end..].starts_with('\n') {
            end += 1;
        }
        stripped.push_str(&remaining[..start]);
        remaining = &remaining[end..];
    }

    stripped.push_str(remaining);
    stripped
}

/// Byte offset of the first ASCII-case-insensitive match of `needle` at or
/// after `from`.
fn find_ignore_case(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let needle = needle.as_bytes();
    let bytes = haystack.as_bytes();
    if needle.is_empty() || bytes.len() < needle.len() {
        return None;
    }
    (from..=bytes.len() - needle.len())
        .find(|&index| bytes[index..index + needle.len()].eq_ignore_ascii_case(needle))
}
