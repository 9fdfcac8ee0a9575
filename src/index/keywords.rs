use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("static token pattern"));

const MIN_TOKEN_CHARS: usize = 2;

/// Lowercased word tokens of at least two characters, in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}

/// Sorted, de-duplicated tokens over several text sources
pub fn keyword_set<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    sources
        .into_iter()
        .flat_map(tokenize)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Normalized city key: trimmed, lowercased, inner whitespace collapsed
pub fn normalize_city(city: &str) -> String {
    city.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
