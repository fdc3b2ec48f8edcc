//! Document extraction and structural validation.
//!
//! The agent's raw text may carry commentary or fences around the document.
//! [`normalize`] cuts the document out and rejects anything that does not
//! look like a complete, well-ordered HTML file. All tag matching is
//! ASCII-case-insensitive; the returned text keeps its original case.

use crate::protocol::{ERROR_PREFIX, HTML_END, HTML_START, PROGRESS_PREFIX};
use crate::{AppError, Result};

/// Raw output was empty.
pub const NO_CONTENT: &str = "No HTML content generated";
/// Root open or close tag missing.
pub const MISSING_ROOT: &str = "Generated content is missing <html> tags";
/// Root close precedes root open.
pub const MISORDERED_ROOT: &str = "Generated content has misordered <html> tags";
/// Doctype appears after the root open tag.
pub const DOCTYPE_AFTER_ROOT: &str = "Generated content has <!DOCTYPE> after <html>";
/// Head section missing or misordered.
pub const MISSING_HEAD: &str = "Generated content is missing a valid <head> section";
/// Body section missing or misordered.
pub const MISSING_BODY: &str = "Generated content is missing a valid <body> section";
/// Body section closes after the document root.
pub const BODY_OUTSIDE_ROOT: &str = "Generated content has <body> outside of <html>";
/// A document line would be read as a protocol line.
///
/// The host trims every stdout line before matching markers, so the check
/// trims too. That also refuses some valid documents, such as a script
/// object literal with an indented `ERROR: 3,` line.
pub const RESERVED_LINE: &str = "Generated content contains a reserved protocol line";

const DOCTYPE: &str = "<!doctype";
const ROOT_CLOSE: &str = "</html>";
const HEAD_CLOSE: &str = "</head>";
const BODY_CLOSE: &str = "</body>";

/// Extract and validate the document in `raw`.
///
/// 1. Trim; empty input fails with [`NO_CONTENT`].
/// 2. Unless the text already starts with a doctype or `<html` open tag,
///    drop everything before the earliest of the two.
/// 3. Drop everything after the last `</html>`.
/// 4. Validate the structure (see the message constants for each rule).
///
/// Applying `normalize` to its own output returns the same text.
///
/// # Errors
///
/// Returns `AppError::MalformedOutput` naming the first rule violated.
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(malformed(NO_CONTENT));
    }

    // ASCII lowercasing keeps byte offsets aligned with the original text.
    let lower = trimmed.to_ascii_lowercase();
    let start = if lower.starts_with(DOCTYPE) || open_tag_at(&lower, 0, "html") {
        0
    } else {
        match (lower.find(DOCTYPE), find_open_tag(&lower, "html", 0)) {
            (Some(doctype), Some(root)) => doctype.min(root),
            (Some(found), None) | (None, Some(found)) => found,
            (None, None) => 0,
        }
    };

    let tail = &lower[start..];
    let end = tail
        .rfind(ROOT_CLOSE)
        .map_or(tail.len(), |index| index + ROOT_CLOSE.len());

    let document = &trimmed[start..start + end];
    validate_structure(&lower[start..start + end])?;
    check_framing(document)?;

    Ok(document.to_owned())
}

/// Structural rules over a lowercased candidate.
fn validate_structure(lower: &str) -> Result<()> {
    let (Some(root_open), Some(root_close_first), Some(root_close_last)) = (
        find_open_tag(lower, "html", 0),
        lower.find(ROOT_CLOSE),
        lower.rfind(ROOT_CLOSE),
    ) else {
        return Err(malformed(MISSING_ROOT));
    };

    if root_close_first < root_open {
        return Err(malformed(MISORDERED_ROOT));
    }

    if lower.find(DOCTYPE).is_some_and(|doctype| doctype > root_open) {
        return Err(malformed(DOCTYPE_AFTER_ROOT));
    }

    if !section_is_ordered(lower, "head", HEAD_CLOSE) {
        return Err(malformed(MISSING_HEAD));
    }

    if !section_is_ordered(lower, "body", BODY_CLOSE) {
        return Err(malformed(MISSING_BODY));
    }

    if lower
        .find(BODY_CLOSE)
        .is_some_and(|body_close| body_close > root_close_last)
    {
        return Err(malformed(BODY_OUTSIDE_ROOT));
    }

    Ok(())
}

/// Reject documents containing a line the host would read as protocol.
///
/// # Errors
///
/// Returns `AppError::MalformedOutput` with [`RESERVED_LINE`].
pub fn check_framing(document: &str) -> Result<()> {
    let reserved = document.lines().map(str::trim).any(|line| {
        line == HTML_START
            || line == HTML_END
            || line.starts_with(PROGRESS_PREFIX)
            || line.starts_with(ERROR_PREFIX)
    });

    if reserved {
        Err(malformed(RESERVED_LINE))
    } else {
        Ok(())
    }
}

fn section_is_ordered(lower: &str, name: &str, close: &str) -> bool {
    match (find_open_tag(lower, name, 0), lower.find(close)) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}

/// First `<name` open tag at or after `from` whose name is followed by `>`,
/// whitespace, or `/`. Keeps `<header>` from matching `head`.
fn find_open_tag(lower: &str, name: &str, from: usize) -> Option<usize> {
    let mut cursor = from;
    while let Some(offset) = lower.get(cursor..)?.find('<') {
        let index = cursor + offset;
        if open_tag_at(lower, index, name) {
            return Some(index);
        }
        cursor = index + 1;
    }
    None
}

fn open_tag_at(lower: &str, index: usize, name: &str) -> bool {
    let bytes = lower.as_bytes();
    let name_end = index + 1 + name.len();
    if bytes.get(index) != Some(&b'<') || bytes.get(index + 1..name_end) != Some(name.as_bytes()) {
        return false;
    }
    matches!(
        bytes.get(name_end),
        Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
    )
}

fn malformed(message: &str) -> AppError {
    AppError::MalformedOutput(message.to_owned())
}
