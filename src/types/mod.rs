// src/types/mod.rs - Tokenized chat message model shared by both filters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a tokenized message segment as produced by the upstream tokenizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Text,
    Emote,
    Emoji,
    Cheer,
    Link,
    Mention,
    /// Any segment type the classifier has no special handling for
    #[serde(other)]
    Other,
}

impl TokenKind {
    /// Emote-class tokens carry no prose of their own
    pub fn is_emote_class(self) -> bool {
        matches!(self, TokenKind::Emote | TokenKind::Emoji | TokenKind::Cheer)
    }
}

/// One segment of a tokenized message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToken {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessageToken {
    pub fn text(text: impl Into<String>) -> Self {
        Self { kind: TokenKind::Text, text: Some(text.into()) }
    }

    pub fn emote(name: impl Into<String>) -> Self {
        Self { kind: TokenKind::Emote, text: Some(name.into()) }
    }

    pub fn emoji(glyph: impl Into<String>) -> Self {
        Self { kind: TokenKind::Emoji, text: Some(glyph.into()) }
    }

    pub fn cheer(text: impl Into<String>) -> Self {
        Self { kind: TokenKind::Cheer, text: Some(text.into()) }
    }

    /// True for text segments made only of whitespace or characters outside
    /// printable ASCII. Empty or missing text never qualifies.
    pub fn is_blank_text(&self) -> bool {
        if self.kind != TokenKind::Text {
            return false;
        }
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text
                .chars()
                .all(|c| c.is_whitespace() || !(' '..='~').contains(&c)),
            _ => false,
        }
    }
}

/// Structural message type reported by the chat pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    Action,
    Resub,
    SubGift,
    SubMystery,
    #[serde(other)]
    Other,
}

impl MessageKind {
    /// System notices the prattle classifier never scores
    pub fn is_subscription_notice(self) -> bool {
        matches!(self, MessageKind::Resub | MessageKind::SubGift | MessageKind::SubMystery)
    }
}

/// Core message type that flows through the filters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    /// Channel as delivered by the pipeline, usually `#name`
    #[serde(default)]
    pub channel: String,
    /// Resolved room login, preferred over `channel` when present
    #[serde(default)]
    pub room_login: Option<String>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Tokenized content; `None` when the tokenizer has not run
    #[serde(default)]
    pub tokens: Option<Vec<MessageToken>>,
    #[serde(default)]
    pub bits: u64,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub message_type: MessageKind,
    /// Suppressed by an earlier filter
    #[serde(default)]
    pub removed: bool,
    /// Deleted by a moderator
    #[serde(default)]
    pub deleted: bool,
}

impl ChatMessage {
    pub fn new(channel: impl Into<String>, username: impl Into<String>, tokens: Vec<MessageToken>) -> Self {
        Self {
            id: None,
            channel: channel.into(),
            room_login: None,
            username: username.into(),
            display_name: None,
            tokens: Some(tokens),
            bits: 0,
            timestamp: chrono::Utc::now(),
            message_type: MessageKind::Chat,
            removed: false,
            deleted: false,
        }
    }

    /// Resolve the room this message belongs to: room login if known, else the
    /// channel without its `#` prefix; trimmed and lowercased.
    pub fn room_name(&self) -> String {
        let raw = match self.room_login.as_deref() {
            Some(login) if !login.is_empty() => login,
            _ => self.channel.strip_prefix('#').unwrap_or(&self.channel),
        };
        raw.trim().to_lowercase()
    }

    pub fn scope(&self) -> ScopeId {
        ScopeId(self.room_name())
    }

    pub fn tokens(&self) -> &[MessageToken] {
        self.tokens.as_deref().unwrap_or(&[])
    }

    /// True when every token is emote-class or blank text and at least one
    /// emote-class token is present.
    pub fn is_emote_only(&self) -> bool {
        let tokens = self.tokens();
        let mut emotes = 0usize;
        for token in tokens {
            if token.kind.is_emote_class() {
                emotes += 1;
            } else if !token.is_blank_text() {
                return false;
            }
        }
        emotes > 0
    }
}

/// Live state of the room a message arrived in
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChatState {
    #[serde(default)]
    pub emote_only: bool,
}

/// Grouping key for per-room history and rate state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub String);

impl ScopeId {
    /// Scope shared by every room when history is tracked globally
    pub fn global() -> Self {
        ScopeId(String::from("*"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        ScopeId(value.to_string())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which channels the emote spam filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Every channel is filterable
    #[default]
    All,
    /// Only listed channels are filterable
    Allowlist,
    /// Every channel except the listed ones is filterable
    Denylist,
}

impl ChannelMode {
    pub fn is_filterable(self, room: &str, channels: &[String]) -> bool {
        match self {
            ChannelMode::All => true,
            ChannelMode::Allowlist => channels.iter().any(|c| c == room),
            ChannelMode::Denylist => !channels.iter().any(|c| c == room),
        }
    }
}

/// Parse a comma separated channel list: trimmed, lowercased, `#` stripped,
/// empty entries dropped.
pub fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|c| c.trim().trim_start_matches('#').trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// A message the prattle classifier flagged, with its decision fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    pub message: ChatMessage,
    pub score: i64,
    pub reasons: Vec<String>,
    pub is_critical: bool,
}

impl ClassifiedMessage {
    /// `[score=reason, reason]`
    pub fn reason_summary(&self) -> String {
        format!("[{}={}]", self.score, self.reasons.join(", "))
    }
}

/// Moderator actions forwarded by the chat pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ModerationEvent {
    /// A single message was deleted
    Delete { user: String, message_id: String },
    /// All of a user's messages are gone
    Timeout { user: String },
    Ban { user: String },
}

impl ModerationEvent {
    pub fn user(&self) -> &str {
        match self {
            ModerationEvent::Delete { user, .. }
            | ModerationEvent::Timeout { user }
            | ModerationEvent::Ban { user } => user,
        }
    }
}
