// src/main.rs - Filter tokenized chat read as JSON lines from stdin

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::env;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use notaprattle::prelude::*;

/// One line of input
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum InputEvent {
    Message {
        message: ChatMessage,
        #[serde(default)]
        state: ChatState,
    },
    Moderation(ModerationEvent),
    Undelete {
        message_id: String,
    },
    Clear,
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting notaprattle v{}", notaprattle::VERSION);

    let config_dir = env::var("NOTAPRATTLE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = ConfigurationManager::new(&config_dir);
    if let Err(e) = config.initialize().await {
        error!("Failed to initialize configuration in {}: {}", config_dir, e);
        return Err(e);
    }

    let filter = ChatFilter::from_config(&config).await;
    info!("Reading chat events from stdin");

    tokio::select! {
        result = process_lines(&filter, BufReader::new(io::stdin()), io::stdout()) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    let stats = filter.get_filter_stats().await;
    info!("Final filter stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}

/// Feed every input line to the filter until the reader is exhausted.
/// Lines that are not UTF-8 or not a known event are skipped with a warning.
async fn process_lines<R, W>(filter: &ChatFilter, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.split(b'\n');
    let mut line_number = 0usize;

    while let Some(raw) = lines.next_segment().await? {
        line_number += 1;
        let event = match parse_line(&raw) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping input line {}: {:#}", line_number, e);
                continue;
            }
        };

        if let Some(output) = handle_event(filter, event).await? {
            writer.write_all(output.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

/// Decode one raw line; blank lines give `None`
fn parse_line(raw: &[u8]) -> Result<Option<InputEvent>> {
    let line = std::str::from_utf8(raw).context("line is not valid UTF-8")?;
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event = serde_json::from_str(line).context("malformed event")?;
    Ok(Some(event))
}

/// Apply one input event, returning the JSON line to print if any
async fn handle_event(filter: &ChatFilter, event: InputEvent) -> Result<Option<String>> {
    match event {
        InputEvent::Message { mut message, state } => {
            let verdict = filter.process_message(&mut message, state).await;
            Ok(Some(serde_json::to_string(&verdict)?))
        }
        InputEvent::Moderation(action) => {
            let marked = filter.handle_moderation(&action).await;
            debug!("Moderation for {} marked {} message(s)", action.user(), marked);
            Ok(None)
        }
        InputEvent::Undelete { message_id } => {
            if !filter.undelete(&message_id).await {
                debug!("No recent message {} to undelete", message_id);
            }
            Ok(None)
        }
        InputEvent::Clear => {
            filter.clear().await;
            Ok(None)
        }
        InputEvent::Stats => Ok(Some(serde_json::to_string(&filter.get_filter_stats().await)?)),
    }
}
