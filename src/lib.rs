//! # Chat Prattle Filter
//!
//! Classifies streamed, already tokenized chat messages as low value using two
//! independent mechanisms:
//!
//! - **Emote spam filter**: hides emote-only messages, optionally only once a
//!   channel sees more than a configured number of them inside a sliding
//!   time window.
//! - **Prattle classifier**: runs an ordered list of declarative scoring
//!   rules (shouting, symbol soup, split-up words, repeated messages, ...)
//!   and flags messages whose total score exceeds a threshold.
//!
//! Neither filter renders or deletes anything; both only annotate and
//! report a decision.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notaprattle::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigurationManager::new("config");
//!     config.initialize().await?;
//!
//!     let filter = ChatFilter::from_config(&config).await;
//!
//!     let mut message = ChatMessage::new("#channel", "viewer", vec![
//!         MessageToken::text("HELLO HELLO HELLO HELLO"),
//!     ]);
//!     let verdict = filter.process_message(&mut message, ChatState::default()).await;
//!     println!("{:?}", verdict);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod filters;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::config::{ConfigChangeEvent, ConfigChangeHandler, ConfigurationManager};
    pub use crate::filters::emote_spam::{EmoteSpamFilter, EmoteSpamSettings};
    pub use crate::filters::prattle::{HistoryScope, PrattleClassifier, PrattleSettings};
    pub use crate::filters::rules::{
        CompileError, CompiledTester, EvaluationResult, MessageContext, RuleError, RuleRegistry, RuleSpec,
        RuleType, Threshold,
    };
    pub use crate::filters::{ChatFilter, FilterVerdict};
    pub use crate::types::{
        ChannelMode, ChatMessage, ChatState, ClassifiedMessage, MessageKind, MessageToken, ModerationEvent,
        ScopeId, TokenKind,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
