//! Tokenization shared by keyword search, scoring and query rewriting.

use std::collections::HashSet;

/// Words carrying no retrieval signal.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by", "from",
    "as", "into", "through", "during", "before", "after", "above", "below", "between", "under",
    "again", "further", "then", "once", "here", "there", "when", "where", "why", "how", "all",
    "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "just", "and", "but", "if", "or", "because", "until",
    "while", "although", "though", "what", "which", "who", "whom", "this", "that", "these",
    "those", "am", "i", "my", "me", "we", "our", "you", "your", "he", "she", "it", "they",
    "them", "his", "her", "its", "their", "help", "please", "tell", "about",
];

/// Check whether a lowercase word is a stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Split text into lowercase word tokens.
///
/// Tokens are maximal runs of alphanumerics, `-` and `_`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .filter(|word| !word.is_empty())
        .map(String::from)
        .collect()
}

/// Extract keywords: tokens of at least two characters that are not stop
/// words, in order of appearance, duplicates kept.
pub fn keywords(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|word| word.len() >= 2 && !is_stop_word(word))
        .collect()
}

/// Keywords with duplicates removed, first occurrence wins.
pub fn unique_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords(text)
        .into_iter()
        .filter(|word| seen.insert(word.clone()))
        .collect()
}
