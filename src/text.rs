//! Small rune-aware string helpers shared by the pipeline stages

/// Number of Unicode scalar values in `text`
pub fn rune_count(text: &str) -> usize {
    text.chars().count()
}

/// Keep at most `limit` runes of `text`
pub fn truncate_runes(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Like [`truncate_runes`] but marks the cut with an ellipsis
pub fn clip(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if rune_count(trimmed) <= limit {
        return trimmed.to_string();
    }
    let mut out = truncate_runes(trimmed, limit.saturating_sub(1));
    out.push('…');
    out
}

/// Lower-case and collapse runs of whitespace into single spaces
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True if any of `needles` occurs in the already lower-cased `haystack`
pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
