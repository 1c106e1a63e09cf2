// src/filters/rules.rs - Declarative scoring rules compiled into a tester

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::OnceCell;
use std::fmt;
use thiserror::Error;

use super::similarity::{Fingerprint, RepeatParams, SimilarityIndex};
use super::text_metrics;
use super::unicode_terms::{TermSet, UnicodeTerm, UnicodeTermTable};
use crate::types::{ChatMessage, MessageToken, ScopeId};

/// One configured rule, before compilation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub critical: bool,
    /// Type-specific parameters: every key besides the three above
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RuleSpec {
    pub fn new(rule_type: &str, score: i64) -> Self {
        Self {
            rule_type: rule_type.to_string(),
            score,
            critical: false,
            params: Map::new(),
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// The closed set of rule implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleType {
    Cheer,
    EmoteOnly,
    Uppercase,
    Spam,
    Unicode,
    Splitting,
    RepeatedMessage,
    RepeatedWords,
}

const REGISTRY: &[(&str, RuleType)] = &[
    ("cheer", RuleType::Cheer),
    ("emote_only", RuleType::EmoteOnly),
    ("uppercase", RuleType::Uppercase),
    ("spam", RuleType::Spam),
    ("unicode", RuleType::Unicode),
    ("splitting", RuleType::Splitting),
    ("repeated_message", RuleType::RepeatedMessage),
    ("repeated_words", RuleType::RepeatedWords),
];

impl RuleType {
    pub fn from_name(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
    }

    pub fn name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    pub fn all() -> impl Iterator<Item = RuleType> {
        REGISTRY.iter().map(|(_, t)| *t)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a single rule entry could not be compiled
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("rule #{index}: unknown rule type '{name}'")]
    UnknownType { index: usize, name: String },

    #[error("rule #{index} ({rule_type}): invalid parameters: {reason}")]
    InvalidParams { index: usize, rule_type: String, reason: String },
}

/// Every failure found while compiling a rule list
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to compile {} rule(s): {}", .0.len(), format_failures(.0))]
pub struct CompileError(pub Vec<RuleError>);

fn format_failures(failures: &[RuleError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheerParams {
    pub min_bits: u64,
}

impl Default for CheerParams {
    fn default() -> Self {
        Self { min_bits: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmoteOnlyParams {
    pub max_emotes: usize,
}

impl Default for EmoteOnlyParams {
    fn default() -> Self {
        Self { max_emotes: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UppercaseParams {
    pub threshold: f64,
}

impl Default for UppercaseParams {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

/// Implementation-defined flood heuristic: long single-character runs, or
/// low character entropy in longer texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpamParams {
    pub max_char_run: usize,
    pub min_entropy: f64,
    pub min_entropy_len: usize,
}

impl Default for SpamParams {
    fn default() -> Self {
        Self {
            max_char_run: 10,
            min_entropy: 3.0,
            min_entropy_len: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnicodeParams {
    pub threshold: f64,
    pub terms: Vec<UnicodeTerm>,
}

impl Default for UnicodeParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            terms: vec![
                UnicodeTerm::category("Letter"),
                UnicodeTerm::category("Number"),
                UnicodeTerm::category("Punctuation"),
                UnicodeTerm::category("Separator"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplittingParams {
    pub limit: usize,
}

impl Default for SplittingParams {
    fn default() -> Self {
        Self { limit: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepeatedMessageParams {
    pub hash_count: usize,
    pub leven_count: usize,
    pub leven_score: f64,
    pub fuzzy_always: bool,
}

impl Default for RepeatedMessageParams {
    fn default() -> Self {
        let defaults = RepeatParams::default();
        Self {
            hash_count: defaults.hash_count,
            leven_count: defaults.leven_count,
            leven_score: defaults.leven_score,
            fuzzy_always: defaults.fuzzy_always,
        }
    }
}

/// Implementation-defined: one word said over and over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepeatedWordsParams {
    pub limit: usize,
    pub min_word_len: usize,
}

impl Default for RepeatedWordsParams {
    fn default() -> Self {
        Self { limit: 3, min_word_len: 2 }
    }
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Score a message must exceed to be flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Score(i64),
    /// Nothing is ever flagged; used for dry runs
    Unbounded,
}

impl Threshold {
    /// Strictly greater than; critical rules override the comparison.
    pub fn decide(self, score: i64, critical: bool) -> bool {
        match self {
            Threshold::Score(limit) => critical || score > limit,
            Threshold::Unbounded => false,
        }
    }
}

/// Per-message evaluation state. Never reused across messages.
pub struct MessageContext<'a> {
    message: &'a ChatMessage,
    scope: ScopeId,
    history: Option<&'a SimilarityIndex>,
    text: OnceCell<String>,
    fingerprint: OnceCell<Fingerprint>,
    pub score: i64,
    pub reasons: Vec<String>,
    pub threshold: Threshold,
    pub critical_triggered: bool,
}

impl<'a> MessageContext<'a> {
    pub fn new(message: &'a ChatMessage, threshold: Threshold) -> Self {
        Self {
            message,
            scope: message.scope(),
            history: None,
            text: OnceCell::new(),
            fingerprint: OnceCell::new(),
            score: 0,
            reasons: Vec::new(),
            threshold,
            critical_triggered: false,
        }
    }

    /// Give repeat rules access to recent history under `scope`
    pub fn with_history(mut self, history: &'a SimilarityIndex, scope: ScopeId) -> Self {
        self.history = Some(history);
        self.scope = scope;
        self
    }

    pub fn message(&self) -> &ChatMessage {
        self.message
    }

    pub fn tokens(&self) -> &[MessageToken] {
        self.message.tokens()
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Plain text of the message: the text of every non-emote token joined
    /// and trimmed. Computed on first use.
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| {
            let joined: String = self
                .tokens()
                .iter()
                .filter(|t| !t.kind.is_emote_class())
                .filter_map(|t| t.text.as_deref())
                .collect();
            joined.trim().to_string()
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.fingerprint.get_or_init(|| Fingerprint::of(self.text()))
    }

    fn history(&self) -> Option<&SimilarityIndex> {
        self.history
    }
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Check {
    Cheer(CheerParams),
    EmoteOnly(EmoteOnlyParams),
    Uppercase(UppercaseParams),
    Spam(SpamParams),
    Unicode { threshold: f64, terms: TermSet },
    Splitting(SplittingParams),
    RepeatedMessage(RepeatParams),
    RepeatedWords(RepeatedWordsParams),
}

impl Check {
    /// Reason detail when the check fires
    fn evaluate(&self, ctx: &MessageContext<'_>) -> Option<String> {
        match self {
            Check::Cheer(p) => {
                let bits = ctx.message().bits;
                (bits >= p.min_bits).then(|| format!("cheer ({} bits)", bits))
            }
            Check::EmoteOnly(p) => {
                let tokens = ctx.tokens();
                text_metrics::is_emote_spam(tokens, p.max_emotes).then(|| {
                    let counts = text_metrics::TokenCounts::of(tokens);
                    format!("emote_only ({} emotes)", counts.emotes)
                })
            }
            Check::Uppercase(p) => {
                let ratio = text_metrics::uppercase_ratio(ctx.text());
                (ratio > p.threshold).then(|| format!("uppercase ({:.0}%)", ratio * 100.0))
            }
            Check::Spam(p) => {
                let text = ctx.text();
                let run = text_metrics::longest_char_run(text);
                if run > p.max_char_run {
                    return Some(format!("spam (run of {})", run));
                }
                if text_metrics::char_count(text) > p.min_entropy_len {
                    let entropy = text_metrics::shannon_entropy(text);
                    if entropy < p.min_entropy {
                        return Some(format!("spam (entropy {:.2})", entropy));
                    }
                }
                None
            }
            Check::Unicode { threshold, terms } => {
                let ratio = terms.unacceptable_ratio(ctx.text());
                (ratio > *threshold).then(|| format!("unicode ({:.0}%)", ratio * 100.0))
            }
            Check::Splitting(p) => {
                let runs = text_metrics::single_char_runs(ctx.text());
                (runs > p.limit).then(|| format!("splitting ({} fragments)", runs))
            }
            Check::RepeatedMessage(params) => {
                let history = ctx.history()?;
                if ctx.text().is_empty() {
                    return None;
                }
                let result = history.lookup(ctx.scope(), ctx.fingerprint(), params);
                if result.exact_hit {
                    Some("repeated_message (exact)".to_string())
                } else if result.fuzzy_hit {
                    let ratio = result.fuzzy_distance_ratio.unwrap_or(0.0);
                    Some(format!("repeated_message (similar {:.2})", ratio))
                } else {
                    None
                }
            }
            Check::RepeatedWords(p) => {
                let (word, count) = text_metrics::most_repeated_word(ctx.text(), p.min_word_len)?;
                (count > p.limit).then(|| format!("repeated_words ({} x{})", word, count))
            }
        }
    }
}

/// A rule bound to its implementation
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule_type: RuleType,
    score: i64,
    critical: bool,
    check: Check,
}

/// Outcome of running a tester over one message
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub score: i64,
    pub reasons: Vec<String>,
    pub critical: bool,
    pub flagged: bool,
    /// Rule types that fired, in evaluation order
    pub fired: Vec<RuleType>,
}

/// An immutable, fully compiled rule list
#[derive(Debug, Clone, Default)]
pub struct CompiledTester {
    rules: Vec<CompiledRule>,
}

impl CompiledTester {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// History entries per scope the repeat rules need to see
    pub fn history_depth(&self) -> usize {
        self.rules
            .iter()
            .filter_map(|r| match &r.check {
                Check::RepeatedMessage(p) => Some(p.depth()),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Run every rule in declaration order against `ctx`. A critical rule
    /// does not stop evaluation, it only overrides the final decision.
    pub fn evaluate(&self, ctx: &mut MessageContext<'_>) -> EvaluationResult {
        let mut fired = Vec::new();

        for rule in &self.rules {
            let Some(reason) = rule.check.evaluate(ctx) else {
                continue;
            };
            ctx.score = ctx.score.saturating_add(rule.score);
            ctx.reasons.push(reason);
            if rule.critical {
                ctx.critical_triggered = true;
            }
            fired.push(rule.rule_type);
        }

        let flagged = ctx.threshold.decide(ctx.score, ctx.critical_triggered);
        if flagged {
            debug!("Message flagged with score {}: {}", ctx.score, ctx.reasons.join(", "));
        }

        EvaluationResult {
            score: ctx.score,
            reasons: ctx.reasons.clone(),
            critical: ctx.critical_triggered,
            flagged,
            fired,
        }
    }
}

/// Maps rule type names to implementations. Probes Unicode term support once
/// on construction.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    unicode: UnicodeTermTable,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            unicode: UnicodeTermTable::probe(),
        }
    }

    /// Compile the whole list or nothing. Every entry is visited so the error
    /// lists all offending rules.
    pub fn compile(&self, specs: &[RuleSpec]) -> Result<CompiledTester, CompileError> {
        let mut rules = Vec::with_capacity(specs.len());
        let mut failures = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            match self.compile_rule(index, spec) {
                Ok(rule) => rules.push(rule),
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            Ok(CompiledTester { rules })
        } else {
            Err(CompileError(failures))
        }
    }

    fn compile_rule(&self, index: usize, spec: &RuleSpec) -> Result<CompiledRule, RuleError> {
        let rule_type = RuleType::from_name(&spec.rule_type).ok_or_else(|| RuleError::UnknownType {
            index,
            name: spec.rule_type.clone(),
        })?;

        let invalid = |reason: String| RuleError::InvalidParams {
            index,
            rule_type: spec.rule_type.clone(),
            reason,
        };

        let check = match rule_type {
            RuleType::Cheer => Check::Cheer(decode(spec).map_err(invalid)?),
            RuleType::EmoteOnly => Check::EmoteOnly(decode(spec).map_err(invalid)?),
            RuleType::Uppercase => {
                let p: UppercaseParams = decode(spec).map_err(invalid)?;
                check_fraction("threshold", p.threshold).map_err(invalid)?;
                Check::Uppercase(p)
            }
            RuleType::Spam => {
                let p: SpamParams = decode(spec).map_err(invalid)?;
                if !p.min_entropy.is_finite() || p.min_entropy < 0.0 {
                    return Err(invalid(format!("min_entropy must be a non-negative number, got {}", p.min_entropy)));
                }
                Check::Spam(p)
            }
            RuleType::Unicode => {
                let p: UnicodeParams = decode(spec).map_err(invalid)?;
                check_fraction("threshold", p.threshold).map_err(invalid)?;
                let terms = self
                    .unicode
                    .compile(&p.terms)
                    .map_err(|e| invalid(e.to_string()))?;
                Check::Unicode { threshold: p.threshold, terms }
            }
            RuleType::Splitting => Check::Splitting(decode(spec).map_err(invalid)?),
            RuleType::RepeatedMessage => {
                let p: RepeatedMessageParams = decode(spec).map_err(invalid)?;
                check_fraction("leven_score", p.leven_score).map_err(invalid)?;
                Check::RepeatedMessage(RepeatParams {
                    hash_count: p.hash_count,
                    leven_count: p.leven_count,
                    leven_score: p.leven_score,
                    fuzzy_always: p.fuzzy_always,
                })
            }
            RuleType::RepeatedWords => Check::RepeatedWords(decode(spec).map_err(invalid)?),
        };

        Ok(CompiledRule {
            rule_type,
            score: spec.score,
            critical: spec.critical,
            check,
        })
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<T: DeserializeOwned>(spec: &RuleSpec) -> Result<T, String> {
    serde_json::from_value(Value::Object(spec.params.clone())).map_err(|e| e.to_string())
}

fn check_fraction(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be between 0.0 and 1.0, got {}", name, value))
    }
}

/// The rule list shipped as the default configuration
pub fn default_rules() -> Vec<RuleSpec> {
    let unicode_terms = serde_json::json!([
        {"t": "cat", "v": "Letter"},
        {"t": "cat", "v": "Number"},
        {"t": "cat", "v": "Punctuation"},
        {"t": "cat", "v": "Separator"}
    ]);

    vec![
        RuleSpec::new("cheer", -100).param("min_bits", 1),
        RuleSpec::new("emote_only", 100).param("max_emotes", 5),
        RuleSpec::new("uppercase", 10).param("threshold", 0.3),
        RuleSpec::new("spam", 20),
        RuleSpec::new("unicode", 3)
            .param("threshold", 0.3)
            .param("terms", unicode_terms),
        RuleSpec::new("splitting", 10).param("limit", 5),
        RuleSpec::new("repeated_message", 100)
            .param("hash_count", 50)
            .param("leven_count", 100)
            .param("leven_score", 0.3),
        RuleSpec::new("repeated_words", 3),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageToken;
    use chrono::Utc;
    use rand::seq::SliceRandom;

    fn text_message(text: &str) -> ChatMessage {
        ChatMessage::new("#room", "viewer", vec![MessageToken::text(text)])
    }

    fn run(tester: &CompiledTester, message: &ChatMessage, threshold: i64) -> EvaluationResult {
        let mut ctx = MessageContext::new(message, Threshold::Score(threshold));
        tester.evaluate(&mut ctx)
    }

    #[test]
    fn test_registry_names_round_trip() {
        for rule_type in RuleType::all() {
            assert_eq!(RuleType::from_name(rule_type.name()), Some(rule_type));
        }
        assert_eq!(RuleType::from_name("nope"), None);
    }

    #[test]
    fn test_default_rules_compile() {
        let registry = RuleRegistry::new();
        let tester = registry.compile(&default_rules()).unwrap();
        assert_eq!(tester.len(), 8);
        assert_eq!(tester.history_depth(), 100);
    }

    #[test]
    fn test_compile_reports_every_failure() {
        let registry = RuleRegistry::new();
        let specs = vec![
            RuleSpec::new("uppercase", 10),
            RuleSpec::new("sparkles", 5),
            RuleSpec::new("uppercase", 10).param("threshold", 2.0),
            RuleSpec::new("splitting", 1).param("limt", 3),
        ];

        let err = registry.compile(&specs).unwrap_err();
        assert_eq!(err.0.len(), 3);
        assert_eq!(err.0[0], RuleError::UnknownType { index: 1, name: "sparkles".to_string() });
        assert!(matches!(err.0[1], RuleError::InvalidParams { index: 2, .. }));
        assert!(matches!(err.0[2], RuleError::InvalidParams { index: 3, .. }));
        assert!(err.to_string().contains("sparkles"));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let registry = RuleRegistry::new();
        let tester = registry
            .compile(&[RuleSpec::new("uppercase", 10).param("threshold", 0.5)])
            .unwrap();
        let message = text_message("LOUD NOISES");

        let at = run(&tester, &message, 10);
        assert_eq!(at.score, 10);
        assert!(!at.flagged);

        let below = run(&tester, &message, 9);
        assert!(below.flagged);
    }

    #[test]
    fn test_critical_overrides_threshold() {
        let registry = RuleRegistry::new();
        let tester = registry
            .compile(&[
                RuleSpec::new("uppercase", 1).param("threshold", 0.5).critical(),
                RuleSpec::new("splitting", 2).param("limit", 1),
            ])
            .unwrap();

        let result = run(&tester, &text_message("S H O U T"), 100);
        assert_eq!(result.score, 3);
        assert!(result.critical);
        assert!(result.flagged);
        // Evaluation continued past the critical rule
        assert_eq!(result.reasons.len(), 2);
        assert_eq!(result.fired, vec![RuleType::Uppercase, RuleType::Splitting]);
    }

    #[test]
    fn test_negative_scores_lower_total() {
        let registry = RuleRegistry::new();
        let tester = registry
            .compile(&[
                RuleSpec::new("cheer", -100).param("min_bits", 1),
                RuleSpec::new("uppercase", 10),
            ])
            .unwrap();

        let mut message = text_message("HELLO THERE");
        message.bits = 100;
        let result = run(&tester, &message, 0);
        assert_eq!(result.score, -90);
        assert!(!result.flagged);

        message.bits = 0;
        let result = run(&tester, &message, 0);
        assert_eq!(result.score, 10);
        assert!(result.flagged);
    }

    #[test]
    fn test_cheer_min_bits_is_inclusive() {
        let registry = RuleRegistry::new();
        let tester = registry.compile(&[RuleSpec::new("cheer", -5).param("min_bits", 0)]).unwrap();

        let mut message = text_message("no bits here");
        let result = run(&tester, &message, 0);
        assert_eq!(result.score, -5);
        assert_eq!(result.reasons, vec!["cheer (0 bits)".to_string()]);

        let tester = registry.compile(&[RuleSpec::new("cheer", -5).param("min_bits", 100)]).unwrap();
        message.bits = 99;
        assert_eq!(run(&tester, &message, 0).score, 0);
        message.bits = 100;
        assert_eq!(run(&tester, &message, 0).score, -5);
    }

    #[test]
    fn test_order_does_not_change_score() {
        let registry = RuleRegistry::new();
        let mut specs = vec![
            RuleSpec::new("uppercase", 10),
            RuleSpec::new("splitting", 7).param("limit", 3),
            RuleSpec::new("repeated_words", 3).param("limit", 2),
            RuleSpec::new("unicode", 4),
            RuleSpec::new("spam", 20),
        ];
        let message = text_message("B U Y  B U Y buy buy buy ♥♥♥♥♥♥");
        let baseline = run(&registry.compile(&specs).unwrap(), &message, 20);

        let mut rng = rand::rng();
        for _ in 0..20 {
            specs.shuffle(&mut rng);
            let shuffled = run(&registry.compile(&specs).unwrap(), &message, 20);
            assert_eq!(shuffled.score, baseline.score);
            assert_eq!(shuffled.flagged, baseline.flagged);
        }
    }

    #[test]
    fn test_unbounded_threshold_records_but_never_flags() {
        let registry = RuleRegistry::new();
        let tester = registry.compile(&[RuleSpec::new("uppercase", 50).critical()]).unwrap();
        let message = text_message("ALL CAPS");

        let mut ctx = MessageContext::new(&message, Threshold::Unbounded);
        let result = tester.evaluate(&mut ctx);
        assert_eq!(result.score, 50);
        assert_eq!(result.reasons.len(), 1);
        assert!(!result.flagged);
        assert!(Threshold::Score(0).decide(result.score, result.critical));
    }

    #[test]
    fn test_context_text_skips_emotes() {
        let message = ChatMessage::new("#room", "viewer", vec![
            MessageToken::emote("Kappa"),
            MessageToken::text("  hello "),
            MessageToken::cheer("cheer100"),
            MessageToken::text("world  "),
        ]);
        let ctx = MessageContext::new(&message, Threshold::Score(0));
        assert_eq!(ctx.text(), "hello world");
        // Memoized
        assert!(std::ptr::eq(ctx.text(), ctx.text()));
    }

    #[test]
    fn test_emote_only_rule() {
        let registry = RuleRegistry::new();
        let tester = registry.compile(&[RuleSpec::new("emote_only", 100).param("max_emotes", 2)]).unwrap();

        let spam = ChatMessage::new("#room", "viewer", vec![
            MessageToken::emote("Kappa"),
            MessageToken::text(" "),
            MessageToken::emote("Kappa"),
            MessageToken::emoji("😀"),
        ]);
        assert_eq!(run(&tester, &spam, 0).score, 100);

        let few = ChatMessage::new("#room", "viewer", vec![MessageToken::emote("Kappa")]);
        assert_eq!(run(&tester, &few, 0).score, 0);
    }

    #[test]
    fn test_text_rules_fire() {
        let registry = RuleRegistry::new();
        let tester = registry
            .compile(&[
                RuleSpec::new("spam", 20),
                RuleSpec::new("repeated_words", 3),
                RuleSpec::new("unicode", 3),
            ])
            .unwrap();

        let flood = run(&tester, &text_message(&format!("h{}", "i".repeat(16))), 0);
        assert_eq!(flood.fired, vec![RuleType::Spam]);

        let words = run(&tester, &text_message("pog pog pog pog"), 0);
        assert_eq!(words.fired, vec![RuleType::RepeatedWords]);

        let symbols = run(&tester, &text_message("♥♥♥ hi"), 0);
        assert_eq!(symbols.fired, vec![RuleType::Unicode]);

        let clean = run(&tester, &text_message("what a great play, well done"), 0);
        assert!(clean.fired.is_empty());
    }

    #[test]
    fn test_repeated_message_rule_uses_history() {
        let registry = RuleRegistry::new();
        let tester = registry.compile(&[RuleSpec::new("repeated_message", 100)]).unwrap();
        let mut index = SimilarityIndex::default();
        let scope = ScopeId::from("room");
        index.record_and_check(&scope, "follow my channel please", Utc::now());

        let exact = text_message("Follow my channel  please");
        let mut ctx = MessageContext::new(&exact, Threshold::Score(0)).with_history(&index, scope.clone());
        let result = tester.evaluate(&mut ctx);
        assert_eq!(result.reasons, vec!["repeated_message (exact)".to_string()]);

        let similar = text_message("follow my channel pleas");
        let mut ctx = MessageContext::new(&similar, Threshold::Score(0)).with_history(&index, scope.clone());
        assert_eq!(tester.evaluate(&mut ctx).score, 100);

        let fresh = text_message("completely unrelated words");
        let mut ctx = MessageContext::new(&fresh, Threshold::Score(0)).with_history(&index, scope);
        assert_eq!(tester.evaluate(&mut ctx).score, 0);

        // No history attached, nothing to compare with
        let mut ctx = MessageContext::new(&exact, Threshold::Score(0));
        assert_eq!(tester.evaluate(&mut ctx).score, 0);
    }

    #[test]
    fn test_rule_spec_yaml_shape() {
        let yaml = r#"
- type: repeated_message
  score: 100
  critical: false
  hash_count: 10
  leven_count: 20
  leven_score: 0.25
- type: unicode
  score: 3
  threshold: 0.3
  terms:
    - {t: cat, v: Letter}
"#;
        let specs: Vec<RuleSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs[0].params.len(), 3);
        assert!(!specs[1].critical);

        let tester = RuleRegistry::new().compile(&specs).unwrap();
        assert_eq!(tester.history_depth(), 20);
    }
}
