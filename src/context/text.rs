//! Small text helpers shared by the compressor, stubs and hashing embedder

use super::token_estimator::TokenEstimator;

const TRIM_CHARS: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'', '`', '-', '_', '/',
];

/// Lowercase, split on whitespace, strip surrounding punctuation
pub fn simple_tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(TRIM_CHARS).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Split after `.`, `!`, `?` and newlines, dropping empty pieces
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Greedy word-level truncation to at most `limit` tokens
pub fn truncate_to_tokens(text: &str, limit: usize, estimator: &dyn TokenEstimator) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0;
    for word in text.split_whitespace() {
        let cost = estimator.estimate(word);
        if used + cost > limit {
            break;
        }
        kept.push(word);
        used += cost;
    }
    kept.join(" ")
}
