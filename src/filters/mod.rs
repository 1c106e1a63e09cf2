// src/filters/mod.rs - Chat filter facade combining emote spam suppression and prattle scoring

pub mod emote_spam;
pub mod prattle;
pub mod rate_window;
pub mod rules;
pub mod similarity;
pub mod text_metrics;
pub mod unicode_terms;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ConfigChangeHandler, ConfigurationManager};
use crate::types::{ChatMessage, ChatState, ClassifiedMessage, ModerationEvent};
use emote_spam::{EmoteSpamFilter, EmoteSpamSettings};
use prattle::{PrattleClassifier, PrattleSettings};
use rules::RuleRegistry;

/// Decision for one message
#[derive(Debug, Clone, Serialize)]
pub struct FilterVerdict {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub room: String,
    pub user: String,
    /// Hidden by the emote spam filter
    pub suppressed: bool,
    /// Flagged by the prattle classifier
    pub prattle: bool,
    /// `None` when the message was not scored
    pub score: Option<i64>,
    pub reasons: Vec<String>,
    pub critical: bool,
}

/// Runs both filters over incoming messages
#[derive(Clone)]
pub struct ChatFilter {
    emote_spam: Arc<RwLock<EmoteSpamFilter>>,
    prattle: Arc<RwLock<PrattleClassifier>>,
    registry: Arc<RuleRegistry>,
    messages_processed: Arc<RwLock<u64>>,
}

impl ChatFilter {
    pub fn new(emote_spam: EmoteSpamSettings, prattle: PrattleSettings) -> Self {
        Self::with_registry(emote_spam, prattle, Arc::new(RuleRegistry::new()))
    }

    /// Build around an already probed rule registry
    pub fn with_registry(
        emote_spam: EmoteSpamSettings,
        prattle: PrattleSettings,
        registry: Arc<RuleRegistry>,
    ) -> Self {
        let classifier = PrattleClassifier::with_registry(prattle, registry.clone());

        Self {
            emote_spam: Arc::new(RwLock::new(EmoteSpamFilter::new(emote_spam))),
            prattle: Arc::new(RwLock::new(classifier)),
            registry,
            messages_processed: Arc::new(RwLock::new(0)),
        }
    }

    /// Build from the manager's current settings and follow its changes
    pub async fn from_config(config: &ConfigurationManager) -> Self {
        let filter = Self::with_registry(
            config.get_emote_spam_settings().await,
            config.get_prattle_settings().await,
            config.registry(),
        );
        config.spawn_change_listener(Arc::new(filter.clone()));
        info!("Chat filter following configuration in {}", config.config_dir().display());
        filter
    }

    /// Run a message through the emote spam filter, then the classifier.
    /// A suppressed message is not scored.
    pub async fn process_message(&self, message: &mut ChatMessage, state: ChatState) -> FilterVerdict {
        *self.messages_processed.write().await += 1;

        let suppressed = self.emote_spam.write().await.process(message, state);

        let assessment = if suppressed {
            None
        } else {
            self.prattle.write().await.assess(message)
        };

        let mut verdict = FilterVerdict {
            id: message.id.clone(),
            room: message.room_name(),
            user: message.username.clone(),
            suppressed,
            prattle: false,
            score: None,
            reasons: Vec::new(),
            critical: false,
        };

        if let Some(assessment) = assessment {
            verdict.prattle = assessment.classified.is_some();
            verdict.score = Some(assessment.result.score);
            verdict.reasons = assessment.result.reasons;
            verdict.critical = assessment.result.critical;
        }
        verdict
    }

    pub async fn handle_moderation(&self, event: &ModerationEvent) -> usize {
        self.prattle.write().await.handle_moderation(event)
    }

    pub async fn undelete(&self, message_id: &str) -> bool {
        self.prattle.write().await.undelete(message_id)
    }

    /// Reset all per-room state, e.g. on a channel change or chat clear
    pub async fn clear(&self) {
        self.emote_spam.write().await.clear();
        self.prattle.write().await.clear();
        debug!("Chat filter state cleared");
    }

    pub async fn recent_prattle(&self) -> Vec<ClassifiedMessage> {
        self.prattle.read().await.recent().cloned().collect()
    }

    pub async fn apply_emote_spam_settings(&self, settings: EmoteSpamSettings) {
        self.emote_spam.write().await.apply_settings(settings);
    }

    /// Compile a changed rule list outside the classifier lock, then swap
    /// the settings and tester in together.
    pub async fn apply_prattle_settings(&self, settings: PrattleSettings) -> Result<()> {
        let needs_compile = self.prattle.read().await.rules_differ(&settings.rules);
        let compiled = needs_compile.then(|| self.registry.compile(&settings.rules).map(Arc::new));

        self.prattle.write().await.apply_compiled(settings, compiled)?;
        Ok(())
    }

    /// Get filter statistics
    pub async fn get_filter_stats(&self) -> HashMap<String, serde_json::Value> {
        let emote_spam = self.emote_spam.read().await;
        let prattle = self.prattle.read().await;
        let classifier_stats = prattle.stats();

        let mut stats = HashMap::new();
        stats.insert(
            "messages_processed".to_string(),
            serde_json::Value::Number((*self.messages_processed.read().await).into()),
        );
        stats.insert(
            "emote_spam_enabled".to_string(),
            serde_json::Value::Bool(emote_spam.settings().enabled),
        );
        stats.insert(
            "emote_only_suppressed".to_string(),
            serde_json::Value::Number(emote_spam.suppressed_count().into()),
        );
        stats.insert(
            "prattle_enabled".to_string(),
            serde_json::Value::Bool(prattle.settings().enabled),
        );
        stats.insert(
            "prattle_evaluated".to_string(),
            serde_json::Value::Number(classifier_stats.evaluated.into()),
        );
        stats.insert(
            "prattle_flagged".to_string(),
            serde_json::Value::Number(classifier_stats.flagged.into()),
        );
        stats.insert(
            "prattle_rules".to_string(),
            serde_json::Value::Number(prattle.rule_count().into()),
        );
        stats.insert(
            "recent_prattle".to_string(),
            serde_json::Value::Number(prattle.recent_len().into()),
        );

        let mut rule_hits = serde_json::Map::new();
        for (name, hits) in &classifier_stats.rule_hits {
            rule_hits.insert(name.clone(), serde_json::json!(hits));
        }
        stats.insert("rule_hits".to_string(), serde_json::Value::Object(rule_hits));

        stats
    }
}

impl Default for ChatFilter {
    fn default() -> Self {
        Self::new(EmoteSpamSettings::default(), PrattleSettings::default())
    }
}

#[async_trait]
impl ConfigChangeHandler for ChatFilter {
    async fn handle_emote_spam_change(&self, settings: EmoteSpamSettings) -> Result<()> {
        self.apply_emote_spam_settings(settings).await;
        Ok(())
    }

    async fn handle_prattle_change(&self, settings: PrattleSettings) -> Result<()> {
        self.apply_prattle_settings(settings).await
    }
}
