//! Keyword extraction for documentation scoring and web queries

use std::collections::HashSet;

pub const MAX_KEYWORDS: usize = 12;
const MIN_KEYWORD_RUNES: usize = 3;

const STOP_WORDS: &[&str] = &[
    // en
    "the", "and", "for", "are", "but", "not", "you", "your", "all", "any", "can", "had", "has",
    "have", "her", "was", "one", "our", "out", "get", "how", "its", "may", "new", "now", "see",
    "who", "why", "what", "when", "where", "which", "with", "this", "that", "these", "those",
    "from", "into", "about", "there", "their", "them", "they", "then", "than", "does", "did",
    "doing", "would", "could", "should", "will", "just", "some", "more", "most", "very", "also",
    "please", "tell", "show", "explain", "give", "want", "need", "like", "make", "much", "many",
    "been", "being", "only", "over", "such", "here", "each", "other",
    // ru
    "как", "что", "это", "для", "или", "так", "все", "всё", "его", "она", "они", "оно", "мне",
    "меня", "мой", "моя", "мои", "наш", "ваш", "при", "без", "над", "под", "про", "где", "когда",
    "почему", "зачем", "какой", "какая", "какие", "каких", "если", "тоже", "также", "чтобы",
    "есть", "был", "была", "были", "быть", "уже", "еще", "ещё", "только", "очень", "можно",
    "нужно", "надо", "пожалуйста", "покажи", "расскажи", "объясни", "там", "тут", "этот", "эта",
    "эти", "того", "чем", "чего",
];

/// Lower-cased, punctuation-free, deduplicated content words (at most 12)
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|w| w.trim_matches(|c: char| c == '-' || c == '_'))
        .filter(|w| w.chars().count() >= MIN_KEYWORD_RUNES)
        .filter(|w| !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_and_short_terms_dropped() {
        let keywords = extract_keywords("How do I set the min-profit filter? The filter is on.");
        assert_eq!(keywords, vec!["set", "min-profit", "filter"]);
    }

    #[test]
    fn test_russian_and_dedupe() {
        let keywords = extract_keywords("Как настроить фильтр объёма? Фильтр не работает!");
        assert_eq!(keywords, vec!["настроить", "фильтр", "объёма", "работает"]);
    }

    #[test]
    fn test_capped() {
        let text = (0..30).map(|i| format!("term{}", i)).collect::<Vec<_>>().join(" ");
        assert_eq!(extract_keywords(&text).len(), MAX_KEYWORDS);
    }
}
