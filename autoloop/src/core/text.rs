//! UTF-8 aware text helpers.

/// Cut `text` to at most `max_bytes`, backing off to a char boundary.
///
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> (&str, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

/// Decode captured process output for logs (lossy, trailing whitespace removed).
pub fn output_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}
