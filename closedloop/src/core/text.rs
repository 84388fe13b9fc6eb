//! Char-safe truncation helpers.

/// Return at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Number of characters (not bytes) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate `text` and report whether anything was dropped.
pub fn clip(text: &str, max_chars: usize) -> (String, bool) {
    let kept = truncate_chars(text, max_chars);
    (kept.to_string(), kept.len() < text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn clip_reports_truncation() {
        assert_eq!(clip("abcdef", 3), ("abc".to_string(), true));
        assert_eq!(clip("abc", 3), ("abc".to_string(), false));
    }
}
