// src/filters/emote_spam.rs - Suppress emote-only messages once they flood a channel

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::rate_window::RateWindow;
use crate::types::{parse_channel_list, ChannelMode, ChatMessage, ChatState, ScopeId};

/// Emote spam filter configuration (`emoteless.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmoteSpamSettings {
    pub enabled: bool,
    pub channel_mode: ChannelMode,
    /// Comma separated channel names for allowlist/denylist modes
    pub channels: String,
    /// Leave emote-only chat mode alone; ignored when `use_threshold` is on
    pub skip_emote_only_mode: bool,
    /// Only suppress once `threshold_count` emote-only messages arrive
    /// within `threshold_window_secs`
    pub use_threshold: bool,
    pub threshold_count: u32,
    pub threshold_window_secs: u32,
}

impl EmoteSpamSettings {
    pub const COUNT_BOUNDS: (u32, u32) = (1, 1000);
    pub const WINDOW_BOUNDS: (u32, u32) = (1, 600);

    /// Copy with the threshold values forced into their allowed ranges
    pub fn clamped(&self) -> Self {
        let mut settings = self.clone();
        settings.threshold_count = settings
            .threshold_count
            .clamp(Self::COUNT_BOUNDS.0, Self::COUNT_BOUNDS.1);
        settings.threshold_window_secs = settings
            .threshold_window_secs
            .clamp(Self::WINDOW_BOUNDS.0, Self::WINDOW_BOUNDS.1);
        settings
    }

    pub fn channel_list(&self) -> Vec<String> {
        parse_channel_list(&self.channels)
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.threshold_window_secs))
    }
}

impl Default for EmoteSpamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_mode: ChannelMode::All,
            channels: String::new(),
            skip_emote_only_mode: true,
            use_threshold: true,
            threshold_count: 3,
            threshold_window_secs: 30,
        }
    }
}

/// Emote-only suppression with an optional per-channel rate limit
#[derive(Debug)]
pub struct EmoteSpamFilter {
    settings: EmoteSpamSettings,
    channels: Vec<String>,
    window: RateWindow,
    suppressed: u64,
}

impl EmoteSpamFilter {
    pub fn new(settings: EmoteSpamSettings) -> Self {
        let settings = settings.clamped();
        let channels = settings.channel_list();
        Self {
            settings,
            channels,
            window: RateWindow::new(),
            suppressed: 0,
        }
    }

    pub fn settings(&self) -> &EmoteSpamSettings {
        &self.settings
    }

    /// Swap in new settings. Turning the filter off forgets all rate state.
    pub fn apply_settings(&mut self, settings: EmoteSpamSettings) {
        let settings = settings.clamped();
        if self.settings.enabled && !settings.enabled {
            info!("Emote spam filter disabled, clearing rate windows");
            self.window.clear();
        }
        self.channels = settings.channel_list();
        self.settings = settings;
        debug!(
            "Emote spam filter settings applied: mode={:?}, {} listed channel(s)",
            self.settings.channel_mode,
            self.channels.len()
        );
    }

    /// Decide whether `message` should be hidden, recording it against the
    /// channel's rate window when it reaches that stage.
    pub fn should_suppress(&mut self, message: &ChatMessage, state: ChatState, now: DateTime<Utc>) -> bool {
        if !self.settings.enabled || message.tokens().is_empty() {
            return false;
        }

        if !self.settings.use_threshold && self.settings.skip_emote_only_mode && state.emote_only {
            return false;
        }

        let room = message.room_name();

        if !self.settings.channel_mode.is_filterable(&room, &self.channels) {
            return false;
        }

        if !message.is_emote_only() {
            return false;
        }

        if self.settings.use_threshold {
            let exceeded = self.window.record_and_exceeds(
                &ScopeId(room.clone()),
                now,
                self.settings.window(),
                self.settings.threshold_count as usize,
            );
            if !exceeded {
                return false;
            }
        }

        self.suppressed += 1;
        debug!("Suppressing emote-only message from {} in {}", message.username, room);
        true
    }

    /// Mark the message removed when it should be suppressed
    pub fn process(&mut self, message: &mut ChatMessage, state: ChatState) -> bool {
        let suppress = self.should_suppress(message, state, Utc::now());
        if suppress {
            message.removed = true;
        }
        suppress
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

impl Default for EmoteSpamFilter {
    fn default() -> Self {
        Self::new(EmoteSpamSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageToken;

    fn emotes(channel: &str) -> ChatMessage {
        ChatMessage::new(channel, "viewer", vec![
            MessageToken::emote("PogChamp"),
            MessageToken::text(" "),
            MessageToken::emote("PogChamp"),
        ])
    }

    fn threshold_settings(count: u32, window: u32) -> EmoteSpamSettings {
        EmoteSpamSettings {
            threshold_count: count,
            threshold_window_secs: window,
            ..EmoteSpamSettings::default()
        }
    }

    #[test]
    fn test_third_emote_burst_is_suppressed() {
        let mut filter = EmoteSpamFilter::new(threshold_settings(3, 30));
        let base = Utc::now();
        let state = ChatState::default();

        let decisions: Vec<bool> = [0, 4, 9]
            .iter()
            .map(|s| filter.should_suppress(&emotes("#x"), state, base + Duration::seconds(*s)))
            .collect();

        assert_eq!(decisions, vec![false, false, true]);
        assert_eq!(filter.suppressed_count(), 1);
    }

    #[test]
    fn test_denylist_channel_never_filtered() {
        let settings = EmoteSpamSettings {
            channel_mode: ChannelMode::Denylist,
            channels: "Foo".to_string(),
            use_threshold: false,
            ..EmoteSpamSettings::default()
        };
        let mut filter = EmoteSpamFilter::new(settings);
        let now = Utc::now();

        assert!(!filter.should_suppress(&emotes("#foo"), ChatState::default(), now));
        assert!(filter.should_suppress(&emotes("#bar"), ChatState::default(), now));
    }

    #[test]
    fn test_text_messages_pass_and_do_not_count() {
        let mut filter = EmoteSpamFilter::new(threshold_settings(2, 30));
        let now = Utc::now();
        let chatter = ChatMessage::new("#x", "viewer", vec![
            MessageToken::emote("Kappa"),
            MessageToken::text(" nice one"),
        ]);

        for _ in 0..5 {
            assert!(!filter.should_suppress(&chatter, ChatState::default(), now));
        }
        assert!(!filter.should_suppress(&emotes("#x"), ChatState::default(), now));
    }

    #[test]
    fn test_emote_only_chat_mode() {
        let emote_mode = ChatState { emote_only: true };
        let now = Utc::now();

        let mut plain = EmoteSpamFilter::new(EmoteSpamSettings {
            use_threshold: false,
            ..EmoteSpamSettings::default()
        });
        assert!(!plain.should_suppress(&emotes("#x"), emote_mode, now));
        assert!(plain.should_suppress(&emotes("#x"), ChatState::default(), now));

        // Threshold mode overrides the emote-only chat exemption
        let mut limited = EmoteSpamFilter::new(threshold_settings(1, 30));
        assert!(limited.should_suppress(&emotes("#x"), emote_mode, now));
    }

    #[test]
    fn test_disabled_filter_records_nothing() {
        let mut filter = EmoteSpamFilter::new(EmoteSpamSettings {
            enabled: false,
            ..threshold_settings(2, 30)
        });
        let now = Utc::now();
        for _ in 0..3 {
            assert!(!filter.should_suppress(&emotes("#x"), ChatState::default(), now));
        }

        filter.apply_settings(threshold_settings(2, 30));
        assert!(!filter.should_suppress(&emotes("#x"), ChatState::default(), now));
        assert!(filter.should_suppress(&emotes("#x"), ChatState::default(), now));
    }

    #[test]
    fn test_disabling_resets_windows() {
        let mut filter = EmoteSpamFilter::new(threshold_settings(2, 30));
        let now = Utc::now();
        filter.should_suppress(&emotes("#x"), ChatState::default(), now);

        filter.apply_settings(EmoteSpamSettings { enabled: false, ..threshold_settings(2, 30) });
        filter.apply_settings(threshold_settings(2, 30));
        assert!(!filter.should_suppress(&emotes("#x"), ChatState::default(), now));
    }

    #[test]
    fn test_settings_are_clamped() {
        let filter = EmoteSpamFilter::new(threshold_settings(0, 5000));
        assert_eq!(filter.settings().threshold_count, 1);
        assert_eq!(filter.settings().threshold_window_secs, 600);
    }

    #[test]
    fn test_process_marks_removed() {
        let mut filter = EmoteSpamFilter::new(threshold_settings(1, 30));
        let mut message = emotes("#x");
        assert!(filter.process(&mut message, ChatState::default()));
        assert!(message.removed);
    }
}
