//! Shared utility functions for the sketchpad crate.

/// Keep the last `max_chars` characters of `text`, prefixing a marker when
/// anything was dropped. Compiler output puts the useful part at the end.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let dropped = total - max_chars;
    let tail: String = text.chars().skip(dropped).collect();
    format!("[... {} chars truncated]\n{}", dropped, tail)
}

/// Shorten a single-line label for logs.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
