// src/filters/text_metrics.rs - Per-message scalar features used by the scoring rules

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::types::MessageToken;

// General category L and Lu
static LETTER_CLASSES: Lazy<Option<(Regex, Regex)>> =
    Lazy::new(|| Some((Regex::new(r"\p{L}").ok()?, Regex::new(r"\p{Lu}").ok()?)));

/// Share of uppercase letters among all letters. Only general category L
/// counts, so digits, symbols such as circled letters, letter-like numbers
/// and whitespace are ignored; no letters gives `0.0`.
pub fn uppercase_ratio(text: &str) -> f64 {
    let Some((letter, upper)) = LETTER_CLASSES.as_ref() else {
        return 0.0;
    };
    ratio(upper.find_iter(text).count(), letter.find_iter(text).count())
}

/// Share of characters for which `acceptable` holds. Empty text gives `0.0`.
pub fn category_ratio<F>(text: &str, acceptable: F) -> f64
where
    F: Fn(char) -> bool,
{
    let mut total = 0usize;
    let mut accepted = 0usize;
    for c in text.chars() {
        total += 1;
        if acceptable(c) {
            accepted += 1;
        }
    }
    ratio(accepted, total)
}

/// Number of whitespace-delimited runs that are a single character long.
/// "h i  t h e r e" has seven.
pub fn single_char_runs(text: &str) -> usize {
    text.split_whitespace()
        .filter(|run| run.chars().count() == 1)
        .count()
}

/// Counts of the token classes a message is made of
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub emotes: usize,
    /// Text tokens with printable content
    pub substantive_text: usize,
    pub other: usize,
}

impl TokenCounts {
    pub fn of(tokens: &[MessageToken]) -> Self {
        let mut counts = TokenCounts::default();
        for token in tokens {
            if token.kind.is_emote_class() {
                counts.emotes += 1;
            } else if token.is_blank_text() {
                continue;
            } else if token.kind == crate::types::TokenKind::Text {
                counts.substantive_text += 1;
            } else {
                counts.other += 1;
            }
        }
        counts
    }

    /// Nothing but emote-class tokens and blank text
    pub fn is_emote_composed(&self) -> bool {
        self.substantive_text == 0 && self.other == 0
    }
}

/// Emote spam: an emote-only composition with more than `max_emotes` emotes.
/// Zero emotes or any substantive token never matches.
pub fn is_emote_spam(tokens: &[MessageToken], max_emotes: usize) -> bool {
    let counts = TokenCounts::of(tokens);
    counts.emotes > 0 && counts.is_emote_composed() && counts.emotes > max_emotes
}

pub fn char_count(text: &str) -> usize {
    text.chars().count()
}

/// Longest run of one repeated character, ignoring whitespace runs.
pub fn longest_char_run(text: &str) -> usize {
    let mut longest = 0usize;
    let mut current = 0usize;
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if Some(c) == prev && !c.is_whitespace() {
            current += 1;
        } else {
            current = 1;
        }
        prev = Some(c);
        if !c.is_whitespace() {
            longest = longest.max(current);
        }
    }
    longest
}

/// Shannon entropy in bits per character. Empty text gives `0.0`.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Highest number of occurrences of any case-folded word with at least
/// `min_len` characters, together with that word.
pub fn most_repeated_word(text: &str, min_len: usize) -> Option<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text.split_whitespace() {
        let word: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() < min_len {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercase_ratio() {
        assert_eq!(uppercase_ratio("ABC"), 1.0);
        assert_eq!(uppercase_ratio("abc"), 0.0);
        assert_eq!(uppercase_ratio("123"), 0.0);
        assert_eq!(uppercase_ratio(""), 0.0);
        assert_eq!(uppercase_ratio("AB cd !!"), 0.5);
        assert_eq!(uppercase_ratio("ÉCOLE"), 1.0);
    }

    #[test]
    fn test_uppercase_ratio_ignores_letter_like_symbols() {
        // Circled letters are So, Roman numerals are Nl
        assert_eq!(uppercase_ratio("ⒶⒷⒸ abc"), 0.0);
        assert_eq!(uppercase_ratio("Ⅻ Ⅻ abc"), 0.0);
        assert_eq!(uppercase_ratio("ⒶⒷⒸ"), 0.0);
    }

    #[test]
    fn test_category_ratio_degenerate() {
        assert_eq!(category_ratio("", |_| true), 0.0);
        assert_eq!(category_ratio("abcd", |c| c == 'a'), 0.25);
    }

    #[test]
    fn test_split_detection() {
        assert_eq!(single_char_runs("h i  t h e r e"), 7);
        assert_eq!(single_char_runs("hi there, I am a person"), 2);
        assert_eq!(single_char_runs(""), 0);
    }

    #[test]
    fn test_emote_spam() {
        let six: Vec<MessageToken> = (0..6).map(|_| MessageToken::emote("Kappa")).collect();
        assert!(is_emote_spam(&six, 5));
        assert!(!is_emote_spam(&six[..5], 5));

        let mut mixed = six.clone();
        mixed.push(MessageToken::text("lol"));
        assert!(!is_emote_spam(&mixed, 5));

        assert!(!is_emote_spam(&[MessageToken::text("  ")], 0));
    }

    #[test]
    fn test_longest_char_run() {
        assert_eq!(longest_char_run("heyyyyy"), 5);
        assert_eq!(longest_char_run("a      b"), 1);
        assert_eq!(longest_char_run(""), 0);
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abcd") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_most_repeated_word() {
        let (word, count) = most_repeated_word("Buy buy BUY now, buy!", 2).unwrap();
        assert_eq!(word, "buy");
        assert_eq!(count, 4);
        assert!(most_repeated_word("a b c", 2).is_none());
    }

    #[test]
    fn test_counts() {
        assert_eq!(char_count("héllo"), 5);
    }
}
