//! Quality scoring: length times lexical diversity.

use std::collections::{HashMap, HashSet};

/// Window for the moving-average type/token ratio.
const DIVERSITY_WINDOW: usize = 50;

/// Lowercased word tokens of cleaned text; heading markers and punctuation dropped.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Score in `[0, 1]`.
///
/// The length factor saturates at `target_words`. Diversity is the
/// moving-average type/token ratio over a 50-word window, so long pages are
/// not penalized merely for being long; shorter texts use the plain ratio.
pub fn quality_score(text: &str, target_words: usize) -> f64 {
    let words = words(text);
    if words.is_empty() {
        return 0.0;
    }

    let length = (words.len() as f64 / target_words.max(1) as f64).min(1.0);
    length * lexical_diversity(&words)
}

fn lexical_diversity(words: &[String]) -> f64 {
    if words.len() <= DIVERSITY_WINDOW {
        let unique: HashSet<&String> = words.iter().collect();
        return unique.len() as f64 / words.len() as f64;
    }

    // Sliding window with running counts
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in &words[..DIVERSITY_WINDOW] {
        *counts.entry(w.as_str()).or_default() += 1;
    }
    let mut total = counts.len();

    for i in DIVERSITY_WINDOW..words.len() {
        let outgoing = words[i - DIVERSITY_WINDOW].as_str();
        if let Some(n) = counts.get_mut(outgoing) {
            *n -= 1;
            if *n == 0 {
                counts.remove(outgoing);
            }
        }
        *counts.entry(words[i].as_str()).or_default() += 1;
        total += counts.len();
    }

    let windows = words.len() - DIVERSITY_WINDOW + 1;
    total as f64 / (windows * DIVERSITY_WINDOW) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_scores_zero() {
        assert_eq!(quality_score("", 100), 0.0);
        assert_eq!(quality_score("## --- !!", 100), 0.0);
    }

    #[test]
    fn short_text_is_penalized_by_length() {
        let score = quality_score("Call now.", 100);
        assert!((score - 0.02).abs() < 1e-9, "{score}");
    }

    #[test]
    fn repetitive_text_scores_low() {
        let spam = "buy cheap pipes ".repeat(60);
        let prose = (0..180).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");

        let spam_score = quality_score(&spam, 100);
        let prose_score = quality_score(&prose, 100);
        assert!(spam_score < 0.1, "{spam_score}");
        assert!((prose_score - 1.0).abs() < 1e-9, "{prose_score}");
    }

    #[test]
    fn words_are_normalized() {
        assert_eq!(words("# Hello, WORLD! It's"), vec!["hello", "world", "it's"]);
    }
}
