//! Utility functions for coldwatch-core.
//!
//! This module contains shared text helpers used for diagnostics and
//! notification messages.

/// Marker appended to truncated text.
pub const ELLIPSIS: &str = "...";

/// Truncate `text` to at most `max_chars` characters, appending `...` when
/// anything was cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
///
/// # Example
///
/// ```
/// use coldwatch_core::util::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("overload", 4), "over...");
/// assert_eq!(truncate_with_ellipsis("ok", 4), "ok");
/// ```
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Join an error and its source chain into one description.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}
