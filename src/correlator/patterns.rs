//! Token matching over pull/merge request text.
//!
//! Extracts three kinds of reference:
//! - `#42` back-references and closing keywords (`Fixes #42`, `closes 42`)
//! - in-progress markers such as `[WIP]` or `Draft:`
//! - bare sequence numbers (`Implements 007`), ignoring longer numbers,
//!   versions and identifiers

use regex::Regex;
use std::sync::LazyLock;

static HASH_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w/])#(\d+)\b").unwrap());

static CLOSING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\b\s*:?\s*#?(\d+)\b").unwrap()
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// True when `text` refers back to the tracker item `id`, either as a
/// standalone `#id` or after a closing keyword.
pub fn references_item(text: &str, id: &str) -> bool {
    let id = id.trim_start_matches('#');
    HASH_REFERENCE
        .captures_iter(text)
        .chain(CLOSING_KEYWORD.captures_iter(text))
        .filter_map(|cap| cap.get(1))
        .any(|m| m.as_str() == id)
}

/// True when `text` carries one of `markers`, compared case-insensitively.
pub fn has_marker(text: &str, markers: &[String]) -> bool {
    let text = text.to_lowercase();
    markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .any(|m| text.contains(&m.to_lowercase()))
}

/// True when `index` appears in `text` as a standalone number.
///
/// Zero padding is allowed (`007` matches 7). Digits that are part of a
/// longer number, glued to letters, prefixed with `#`/`!`, or part of a
/// dotted version never match.
pub fn mentions_index(text: &str, index: u32) -> bool {
    let bytes = text.as_bytes();
    NUMBER.find_iter(text).any(|m| {
        let before = m.start().checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(m.end()).copied();
        let after_next = bytes.get(m.end() + 1).copied();

        let glued_before = matches!(before, Some(b) if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'#' | b'!' | b'.'));
        let glued_after = matches!(after, Some(b) if b.is_ascii_alphanumeric() || b == b'_');
        let version = after == Some(b'.') && after_next.is_some_and(|b| b.is_ascii_digit());

        !glued_before && !glued_after && !version && m.as_str().parse::<u32>().ok() == Some(index)
    })
}
