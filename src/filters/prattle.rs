// src/filters/prattle.rs - Rule-scored "prattle" classification with a bounded recent list

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::rules::{
    default_rules, CompileError, CompiledTester, EvaluationResult, MessageContext, RuleRegistry, RuleSpec,
    Threshold,
};
use super::similarity::SimilarityIndex;
use crate::types::{ChatMessage, ClassifiedMessage, ModerationEvent, ScopeId};

/// Where repeated-message history is grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    #[default]
    Channel,
    Global,
}

/// Prattle classifier configuration (`prattle.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrattleSettings {
    pub enabled: bool,
    /// Messages scoring strictly above this are flagged
    pub threshold: i64,
    /// Score and record reasons but never flag
    pub dry_run: bool,
    pub history_scope: HistoryScope,
    /// Flagged messages kept for display
    pub scrollback_limit: usize,
    pub rules: Vec<RuleSpec>,
}

impl Default for PrattleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0,
            dry_run: false,
            history_scope: HistoryScope::Channel,
            scrollback_limit: 20,
            rules: default_rules(),
        }
    }
}

/// Running counters for the classifier
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassifierStats {
    pub evaluated: u64,
    pub flagged: u64,
    /// Rule type name -> times it fired
    pub rule_hits: HashMap<String, u64>,
}

/// Evaluation of one message plus the retained record when it was flagged
#[derive(Debug, Clone)]
pub struct Assessment {
    pub result: EvaluationResult,
    pub classified: Option<ClassifiedMessage>,
}

pub struct PrattleClassifier {
    settings: PrattleSettings,
    registry: Arc<RuleRegistry>,
    tester: Option<Arc<CompiledTester>>,
    history: SimilarityIndex,
    recent: VecDeque<ClassifiedMessage>,
    stats: ClassifierStats,
}

impl PrattleClassifier {
    /// Build a classifier and compile its rules. A rule list that fails to
    /// compile leaves scoring disabled until a valid one is applied.
    pub fn new(settings: PrattleSettings) -> Self {
        Self::with_registry(settings, Arc::new(RuleRegistry::new()))
    }

    /// Build a classifier that compiles with an already probed registry
    pub fn with_registry(settings: PrattleSettings, registry: Arc<RuleRegistry>) -> Self {
        let mut classifier = Self {
            settings: settings.clone(),
            registry,
            tester: None,
            history: SimilarityIndex::default(),
            recent: VecDeque::new(),
            stats: ClassifierStats::default(),
        };
        classifier.history.set_capacity(0);
        if let Err(e) = classifier.apply_rules(&settings.rules) {
            error!("Prattle classifier starting without rules: {}", e);
        }
        classifier
    }

    pub fn settings(&self) -> &PrattleSettings {
        &self.settings
    }

    pub fn tester(&self) -> Option<Arc<CompiledTester>> {
        self.tester.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.tester.as_ref().map_or(0, |t| t.len())
    }

    /// Swap in an already compiled tester. An empty one disables scoring.
    pub fn install(&mut self, tester: Arc<CompiledTester>) {
        if tester.is_empty() {
            info!("Prattle rule list is empty, scoring disabled");
            self.tester = None;
            self.history.set_capacity(0);
            return;
        }

        self.history.set_capacity(tester.history_depth());
        info!("Installed prattle tester with {} rule(s)", tester.len());
        self.tester = Some(tester);
    }

    /// Compile and install `rules`. On failure the current tester stays.
    pub fn apply_rules(&mut self, rules: &[RuleSpec]) -> Result<(), CompileError> {
        let settings = PrattleSettings {
            rules: rules.to_vec(),
            ..self.settings.clone()
        };
        let compiled = self.registry.compile(rules).map(Arc::new);
        self.apply_compiled(settings, Some(compiled))
    }

    /// Apply new settings; the rule list is only recompiled when it changed.
    pub fn apply_settings(&mut self, settings: PrattleSettings) -> Result<(), CompileError> {
        let compiled = self
            .rules_differ(&settings.rules)
            .then(|| self.registry.compile(&settings.rules).map(Arc::new));
        self.apply_compiled(settings, compiled)
    }

    pub fn rules_differ(&self, rules: &[RuleSpec]) -> bool {
        self.settings.rules.as_slice() != rules
    }

    /// Apply settings whose rule list was compiled elsewhere. `None` means
    /// the rules are unchanged. A failed compile keeps the current tester and
    /// rule list but still applies the other settings.
    pub fn apply_compiled(
        &mut self,
        settings: PrattleSettings,
        compiled: Option<Result<Arc<CompiledTester>, CompileError>>,
    ) -> Result<(), CompileError> {
        if settings.history_scope != self.settings.history_scope {
            debug!("History scope changed to {:?}, clearing history", settings.history_scope);
            self.history.clear();
        }

        let rules = std::mem::take(&mut self.settings.rules);
        self.settings = PrattleSettings { rules, ..settings.clone() };
        self.trim_recent();

        match compiled {
            None => Ok(()),
            Some(Ok(tester)) => {
                self.settings.rules = settings.rules;
                self.install(tester);
                Ok(())
            }
            Some(Err(e)) => {
                error!("Failed to compile prattle rules, keeping previous tester: {}", e);
                Err(e)
            }
        }
    }

    /// Scoring applies to chat lines that are tokenized, still visible and
    /// not subscription notices.
    pub fn is_ignored(&self, message: &ChatMessage) -> bool {
        !self.settings.enabled
            || message.removed
            || message.deleted
            || message.tokens.is_none()
            || message.message_type.is_subscription_notice()
    }

    fn scope_for(&self, message: &ChatMessage) -> ScopeId {
        match self.settings.history_scope {
            HistoryScope::Channel => message.scope(),
            HistoryScope::Global => ScopeId::global(),
        }
    }

    /// Score a message and remember it for repeat detection. Returns the
    /// true score and reasons even in dry-run mode, where `flagged` is
    /// always false.
    pub fn evaluate(&mut self, message: &ChatMessage) -> Option<EvaluationResult> {
        if self.is_ignored(message) {
            return None;
        }
        let tester = self.tester.clone()?;

        let scope = self.scope_for(message);
        let threshold = if self.settings.dry_run {
            Threshold::Unbounded
        } else {
            Threshold::Score(self.settings.threshold)
        };

        let (result, fingerprint) = {
            let mut ctx = MessageContext::new(message, threshold).with_history(&self.history, scope.clone());
            let result = tester.evaluate(&mut ctx);
            let fingerprint = (self.history.capacity() > 0).then(|| ctx.fingerprint().clone());
            (result, fingerprint)
        };

        if let Some(fingerprint) = fingerprint.filter(|f| !f.normalized.is_empty()) {
            self.history.record(&scope, &fingerprint, message.timestamp);
        }

        self.stats.evaluated += 1;
        for rule_type in &result.fired {
            *self.stats.rule_hits.entry(rule_type.name().to_string()).or_insert(0) += 1;
        }

        Some(result)
    }

    /// Classify a message, retaining and returning it only when flagged
    pub fn classify(&mut self, message: &ChatMessage) -> Option<ClassifiedMessage> {
        self.assess(message).and_then(|a| a.classified)
    }

    /// Evaluate a message and retain it when flagged, returning the full
    /// evaluation either way. `None` when the message is not scored at all.
    pub fn assess(&mut self, message: &ChatMessage) -> Option<Assessment> {
        let result = self.evaluate(message)?;
        if !result.flagged {
            return Some(Assessment { result, classified: None });
        }

        let classified = ClassifiedMessage {
            message: message.clone(),
            score: result.score,
            reasons: result.reasons.clone(),
            is_critical: result.critical,
        };
        debug!(
            "Prattle from {} in {}: {}",
            message.username,
            message.room_name(),
            classified.reason_summary()
        );

        self.stats.flagged += 1;
        self.recent.push_back(classified.clone());
        self.trim_recent();
        Some(Assessment {
            result,
            classified: Some(classified),
        })
    }

    /// Drop the oldest entries, always an even number at a time, until the
    /// list fits the scrollback limit.
    fn trim_recent(&mut self) {
        let mut excess = self.recent.len().saturating_sub(self.settings.scrollback_limit);
        if excess % 2 == 1 {
            excess += 1;
        }
        let excess = excess.min(self.recent.len());
        self.recent.drain(..excess);
    }

    pub fn recent(&self) -> impl Iterator<Item = &ClassifiedMessage> {
        self.recent.iter()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Mark recent flagged messages deleted. Returns how many were marked.
    pub fn handle_moderation(&mut self, event: &ModerationEvent) -> usize {
        let user = event.user();
        let target_id = match event {
            ModerationEvent::Delete { message_id, .. } => Some(message_id.as_str()),
            ModerationEvent::Timeout { .. } | ModerationEvent::Ban { .. } => None,
        };

        let mut marked = 0;
        for entry in self.recent.iter_mut().rev() {
            let message = &mut entry.message;
            if message.deleted || !message.username.eq_ignore_ascii_case(user) {
                continue;
            }
            if let Some(id) = target_id {
                if message.id.as_deref() != Some(id) {
                    continue;
                }
            }
            message.deleted = true;
            marked += 1;
        }

        if marked > 0 {
            debug!("Marked {} recent message(s) from {} deleted", marked, user);
        }
        marked
    }

    pub fn undelete(&mut self, message_id: &str) -> bool {
        match self
            .recent
            .iter_mut()
            .find(|entry| entry.message.id.as_deref() == Some(message_id))
        {
            Some(entry) => {
                entry.message.deleted = false;
                true
            }
            None => false,
        }
    }

    /// Forget the recent list and all repeat history
    pub fn clear(&mut self) {
        self.recent.clear();
        self.history.clear();
    }

    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }
}

impl Default for PrattleClassifier {
    fn default() -> Self {
        Self::new(PrattleSettings::default())
    }
}
