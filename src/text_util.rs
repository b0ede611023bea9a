/// Maximum number of characters in a result preview before truncation.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 400;

/// Collapse every run of whitespace into a single space and trim the ends.
///
/// ```
/// use docrag::text_util::normalize_whitespace;
///
/// assert_eq!(normalize_whitespace("  a\n\n b\t c "), "a b c");
/// ```
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Shorten `text` to at most `max_chars` characters, preferring to cut at
/// a word boundary, and mark the cut with `...`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = normalize_whitespace(text);
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let cut_byte = flat
        .char_indices()
        .nth(max_chars)
        .map(|(byte_idx, _)| byte_idx)
        .unwrap_or(flat.len());
    let head = &flat[..cut_byte];
    let head = match head.rfind(' ') {
        Some(space) if space > cut_byte / 2 => &head[..space],
        _ => head,
    };

    format!("{head}...")
}
