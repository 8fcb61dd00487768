//! N-gram Fuzzy Search
//!
//! Similarity is the share of the longer string's n-grams that also occur in the shorter
//! one, each shared n-gram counted once. Both strings are lowercased and padded with
//! `gram_size - 1` spaces on either side.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzySearchOptions {
    pub gram_size: usize,
    /// Minimum score a result needs.
    pub threshold: f64,
    /// Maximum number of results.
    pub take: usize,
}

impl Default for FuzzySearchOptions {
    fn default() -> Self {
        Self {
            gram_size: 2,
            threshold: 0.01,
            take: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f64,
}

pub fn ngrams(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let padding = " ".repeat(size - 1);
    let padded: Vec<char> = format!("{}{}{}", padding, text.to_lowercase(), padding)
        .chars()
        .collect();

    padded
        .windows(size)
        .map(|window| window.iter().collect())
        .collect()
}

/// Score in `[0, 1]`; 0 when either string is empty.
pub fn string_similarity(a: &str, b: &str, gram_size: usize) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (shorter, longer) = if a.chars().count() < b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let mut remaining: HashSet<String> = ngrams(shorter, gram_size).into_iter().collect();
    let grams = ngrams(longer, gram_size);
    let hits = grams.iter().filter(|gram| remaining.remove(*gram)).count();

    hits as f64 / grams.len() as f64
}

/// Ranks `items` by similarity of `key(item)` to `term`, best first.
pub fn fuzzy_search<T, F>(
    term: &str,
    items: &[T],
    key: F,
    options: FuzzySearchOptions,
) -> Vec<Scored<T>>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    let mut scored: Vec<Scored<T>> = items
        .iter()
        .map(|item| Scored {
            score: string_similarity(term, key(item), options.gram_size),
            item: item.clone(),
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.retain(|result| result.score >= options.threshold);
    scored.truncate(options.take);
    scored
}
