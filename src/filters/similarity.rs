// src/filters/similarity.rs - Repeated-message detection over a bounded per-scope history

use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use unicode_normalization::UnicodeNormalization;

use crate::types::ScopeId;

/// Texts are cut to this many characters before edit-distance comparison
pub const MAX_COMPARE_CHARS: usize = 2000;

/// Lowercase and collapse whitespace, after folding compatibility forms
/// (fullwidth letters and the like) to their plain equivalents.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Non-cryptographic 64-bit hash of already normalized text
pub fn fast_hash(normalized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// Levenshtein distance over characters, keeping only two rows sized by the
/// shorter input.
pub fn edit_distance(a: &[char], b: &[char]) -> usize {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr: Vec<usize> = vec![0; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = if lc == sc { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Edit distance divided by the longer length, in `[0, 1]`. Two empty
/// strings are identical.
pub fn distance_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().take(MAX_COMPARE_CHARS).collect();
    let b: Vec<char> = b.chars().take(MAX_COMPARE_CHARS).collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    edit_distance(&a, &b) as f64 / longest as f64
}

/// One remembered message
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub fast_hash: u64,
    pub normalized_text: String,
    pub timestamp: DateTime<Utc>,
    pub scope: ScopeId,
}

/// Lookback windows for one repeat check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatParams {
    pub hash_count: usize,
    pub leven_count: usize,
    /// Maximum distance ratio that still counts as a repeat
    pub leven_score: f64,
    /// Run the fuzzy scan even after an exact hit
    pub fuzzy_always: bool,
}

impl Default for RepeatParams {
    fn default() -> Self {
        Self {
            hash_count: 50,
            leven_count: 100,
            leven_score: 0.3,
            fuzzy_always: false,
        }
    }
}

impl RepeatParams {
    pub fn depth(&self) -> usize {
        self.hash_count.max(self.leven_count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RepeatResult {
    pub exact_hit: bool,
    pub fuzzy_hit: bool,
    /// Smallest distance ratio seen in the fuzzy window, if it was scanned
    pub fuzzy_distance_ratio: Option<f64>,
}

impl RepeatResult {
    pub fn is_repeat(&self) -> bool {
        self.exact_hit || self.fuzzy_hit
    }
}

/// Normalized text and hash of the message under test, computed once
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub normalized: String,
    pub hash: u64,
}

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        let normalized = normalize(text);
        let hash = fast_hash(&normalized);
        Self { normalized, hash }
    }
}

/// Bounded per-scope history of recently seen messages
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    params: RepeatParams,
    capacity: usize,
    history: HashMap<ScopeId, VecDeque<HistoryEntry>>,
}

impl SimilarityIndex {
    pub fn new(params: RepeatParams) -> Self {
        Self {
            params,
            capacity: params.depth(),
            history: HashMap::new(),
        }
    }

    pub fn params(&self) -> RepeatParams {
        self.params
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change how many entries are retained per scope. Shrinking trims
    /// existing scopes immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        for entries in self.history.values_mut() {
            Self::trim(entries, capacity);
        }
    }

    /// Check `fingerprint` against the scope's recent history without
    /// recording it.
    pub fn lookup(&self, scope: &ScopeId, fingerprint: &Fingerprint, params: &RepeatParams) -> RepeatResult {
        let mut result = RepeatResult::default();
        let entries = match self.history.get(scope) {
            Some(entries) => entries,
            None => return result,
        };

        result.exact_hit = entries
            .iter()
            .rev()
            .take(params.hash_count)
            .any(|e| e.fast_hash == fingerprint.hash && e.normalized_text == fingerprint.normalized);

        if result.exact_hit && !params.fuzzy_always {
            return result;
        }

        let mut best: Option<f64> = None;
        for entry in entries.iter().rev().take(params.leven_count) {
            let ratio = distance_ratio(&fingerprint.normalized, &entry.normalized_text);
            best = Some(best.map_or(ratio, |b: f64| b.min(ratio)));
            if ratio <= params.leven_score {
                result.fuzzy_hit = true;
                if !params.fuzzy_always {
                    break;
                }
            }
        }
        result.fuzzy_distance_ratio = best;
        result
    }

    /// Append a message to the scope's history, evicting the oldest entries
    /// beyond capacity.
    pub fn record(&mut self, scope: &ScopeId, fingerprint: &Fingerprint, now: DateTime<Utc>) {
        let capacity = self.capacity;
        let entries = self.history.entry(scope.clone()).or_default();
        entries.push_back(HistoryEntry {
            fast_hash: fingerprint.hash,
            normalized_text: fingerprint.normalized.clone(),
            timestamp: now,
            scope: scope.clone(),
        });
        Self::trim(entries, capacity);
    }

    /// Check against the index's own windows, then record.
    pub fn record_and_check(&mut self, scope: &ScopeId, text: &str, now: DateTime<Utc>) -> RepeatResult {
        let fingerprint = Fingerprint::of(text);
        let params = self.params;
        let result = self.lookup(scope, &fingerprint, &params);
        self.record(scope, &fingerprint, now);
        result
    }

    pub fn len(&self, scope: &ScopeId) -> usize {
        self.history.get(scope).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.history.values().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn trim(entries: &mut VecDeque<HistoryEntry>, capacity: usize) {
        while entries.len() > capacity {
            entries.pop_front();
        }
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new(RepeatParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scope() -> ScopeId {
        ScopeId::from("room")
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize("  Hello   WORLD \t"), "hello world");
        assert_eq!(normalize("ＨＥＬＬＯ"), "hello");
        assert_eq!(fast_hash(&normalize("Hi  there")), fast_hash(&normalize("hi there")));
    }

    #[test]
    fn test_edit_distance() {
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(edit_distance(&a, &b), 3);
        assert_eq!(edit_distance(&b, &a), 3);
        assert_eq!(edit_distance(&[], &a), 6);
        assert_eq!(distance_ratio("", ""), 0.0);
        assert_eq!(distance_ratio("abc", ""), 1.0);
    }

    #[test]
    fn test_distance_ratio_truncates() {
        let a = "a".repeat(MAX_COMPARE_CHARS + 500);
        let b = "a".repeat(MAX_COMPARE_CHARS);
        assert_eq!(distance_ratio(&a, &b), 0.0);
    }

    #[test]
    fn test_exact_duplicate_detection() {
        let mut index = SimilarityIndex::default();
        let now = Utc::now();

        let first = index.record_and_check(&scope(), "Buy followers at example", now);
        assert!(!first.exact_hit);

        let second = index.record_and_check(&scope(), "buy  FOLLOWERS at example", now);
        assert!(second.exact_hit);
    }

    #[test]
    fn test_fuzzy_duplicate_thresholds() {
        let now = Utc::now();
        // One substitution in ten characters
        let loose = RepeatParams { leven_score: 0.3, ..RepeatParams::default() };
        let mut index = SimilarityIndex::new(loose);
        index.record_and_check(&scope(), "abcdefghij", now);
        let result = index.record_and_check(&scope(), "abcdefghiX", now);
        assert!(!result.exact_hit);
        assert!(result.fuzzy_hit);
        assert!((result.fuzzy_distance_ratio.unwrap() - 0.1).abs() < 1e-9);

        let strict = RepeatParams { leven_score: 0.05, ..RepeatParams::default() };
        let mut index = SimilarityIndex::new(strict);
        index.record_and_check(&scope(), "abcdefghij", now);
        let result = index.record_and_check(&scope(), "abcdefghiX", now);
        assert!(!result.fuzzy_hit);
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut index = SimilarityIndex::default();
        let now = Utc::now();
        index.record_and_check(&ScopeId::from("a"), "same text", now);
        let other = index.record_and_check(&ScopeId::from("b"), "same text", now);
        assert!(!other.is_repeat());
    }

    #[test]
    fn test_history_is_bounded() {
        let params = RepeatParams { hash_count: 2, leven_count: 3, leven_score: 0.0, fuzzy_always: false };
        let mut index = SimilarityIndex::new(params);
        let start = Utc::now();
        for i in 0..10 {
            index.record_and_check(&scope(), &format!("message number {}", i), start + Duration::seconds(i));
        }
        assert_eq!(index.len(&scope()), 3);

        // Entry 7 is outside the exact window but inside the fuzzy one
        let result = index.lookup(&scope(), &Fingerprint::of("message number 7"), &params);
        assert!(!result.exact_hit);
        assert!(result.fuzzy_hit);

        // Entry 0 was evicted long ago
        let result = index.lookup(&scope(), &Fingerprint::of("message number 0"), &params);
        assert!(!result.is_repeat());
    }

    #[test]
    fn test_set_capacity_trims() {
        let mut index = SimilarityIndex::default();
        let now = Utc::now();
        for i in 0..20 {
            index.record_and_check(&scope(), &format!("line {}", i), now);
        }
        index.set_capacity(5);
        assert_eq!(index.len(&scope()), 5);
        index.clear();
        assert!(index.is_empty());
    }
}
