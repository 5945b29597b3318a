pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Caps `value` at `max_chars` characters, marker included, so the output of
/// one pass is never truncated again.
pub fn truncate_chars_with_marker(value: &str, max_chars: usize, marker: &str) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let marker_len = marker.chars().count();
    if max_chars <= marker_len {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - marker_len).collect();
    out.push_str(marker);
    out
}

/// Any run of whitespace becomes one space; ends are trimmed.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
