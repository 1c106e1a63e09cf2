// src/config/mod.rs - Settings files for both filters with validation and hot reload

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use crate::filters::emote_spam::EmoteSpamSettings;
use crate::filters::prattle::PrattleSettings;
use crate::filters::rules::RuleRegistry;

/// Quiet period after the last change to a file before it is reloaded
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// The settings files the manager owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFile {
    EmoteSpam,
    Prattle,
}

impl ConfigFile {
    pub const ALL: [ConfigFile; 2] = [ConfigFile::EmoteSpam, ConfigFile::Prattle];

    pub fn stem(self) -> &'static str {
        match self {
            ConfigFile::EmoteSpam => "emoteless",
            ConfigFile::Prattle => "prattle",
        }
    }

    /// Name of the file written when defaults are created
    pub fn default_file_name(self) -> String {
        format!("{}.yaml", self.stem())
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if !matches!(ext, "yaml" | "yml" | "toml") {
            return None;
        }
        Self::ALL.into_iter().find(|f| f.stem() == stem)
    }
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone)]
pub enum ConfigChangeEvent {
    EmoteSpamUpdated { file: String },
    PrattleUpdated { file: String },
    ValidationError { file: String, error: String },
    ReloadComplete { files_updated: Vec<String> },
}

/// Receives settings after they were reloaded and validated
#[async_trait]
pub trait ConfigChangeHandler: Send + Sync {
    async fn handle_emote_spam_change(&self, settings: EmoteSpamSettings) -> Result<()>;
    async fn handle_prattle_change(&self, settings: PrattleSettings) -> Result<()>;
}

/// Configuration validator
pub struct ConfigValidator {
    registry: Arc<RuleRegistry>,
}

impl ConfigValidator {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    /// Out-of-range thresholds are clamped with a warning rather than rejected
    pub fn validate_emote_spam(&self, settings: EmoteSpamSettings) -> Result<EmoteSpamSettings> {
        let clamped = settings.clamped();
        if clamped.threshold_count != settings.threshold_count {
            warn!(
                "threshold_count {} out of range, using {}",
                settings.threshold_count, clamped.threshold_count
            );
        }
        if clamped.threshold_window_secs != settings.threshold_window_secs {
            warn!(
                "threshold_window_secs {} out of range, using {}",
                settings.threshold_window_secs, clamped.threshold_window_secs
            );
        }
        if clamped.channel_mode != crate::types::ChannelMode::All && clamped.channel_list().is_empty() {
            warn!("Channel mode {:?} configured with an empty channel list", clamped.channel_mode);
        }
        Ok(clamped)
    }

    /// The rule list must compile as a whole
    pub fn validate_prattle(&self, settings: &PrattleSettings) -> Result<()> {
        self.registry.compile(&settings.rules)?;
        Ok(())
    }
}

/// Main configuration manager for the filter settings files
#[derive(Clone)]
pub struct ConfigurationManager {
    /// Base directory for all configuration files
    config_dir: PathBuf,

    emote_spam: Arc<RwLock<EmoteSpamSettings>>,
    prattle: Arc<RwLock<PrattleSettings>>,

    /// Kept alive so the watch stays registered
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,

    change_notifier: broadcast::Sender<ConfigChangeEvent>,
    validator: Arc<ConfigValidator>,
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            emote_spam: Arc::new(RwLock::new(EmoteSpamSettings::default())),
            prattle: Arc::new(RwLock::new(PrattleSettings::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
            validator: Arc::new(ConfigValidator::new(Arc::new(RuleRegistry::new()))),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Registry the validator compiles with, shared so Unicode support is
    /// probed once per process
    pub fn registry(&self) -> Arc<RuleRegistry> {
        self.validator.registry.clone()
    }

    /// Load both files (writing defaults for missing ones) and start
    /// watching the directory.
    pub async fn initialize(&self) -> Result<()> {
        self.load_all_configs().await?;
        self.setup_file_watchers().await?;
        info!("Configuration manager initialized successfully");
        Ok(())
    }

    /// Load both files without watching for changes
    pub async fn load_all_configs(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).await?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let mut files_loaded = Vec::new();
        for file in ConfigFile::ALL {
            match self.find_config_path(file) {
                None => {
                    self.create_default_config(file).await?;
                    files_loaded.push(format!("{} (created default)", file.default_file_name()));
                }
                Some(path) => {
                    let name = display_name(&path);
                    match self.load_config(file, &path).await {
                        Ok(()) => files_loaded.push(name),
                        Err(e) => {
                            warn!("Failed to load {}, using defaults: {}", name, e);
                            files_loaded.push(format!("{} (invalid, using defaults)", name));
                        }
                    }
                }
            }
        }

        let _ = self.change_notifier.send(ConfigChangeEvent::ReloadComplete { files_updated: files_loaded });
        Ok(())
    }

    /// First existing file for `file`: `.yaml`, then `.yml`, then `.toml`
    fn find_config_path(&self, file: ConfigFile) -> Option<PathBuf> {
        ["yaml", "yml", "toml"]
            .iter()
            .map(|ext| self.config_dir.join(format!("{}.{}", file.stem(), ext)))
            .find(|path| path.exists())
    }

    async fn load_config(&self, file: ConfigFile, path: &Path) -> Result<()> {
        Self::reload_config(file, path, &self.emote_spam, &self.prattle, &self.validator).await?;
        debug!("Loaded {:?} configuration from {}", file, path.display());
        Ok(())
    }

    /// Parse, validate and only then swap in one settings file
    async fn reload_config(
        file: ConfigFile,
        path: &Path,
        emote_spam: &Arc<RwLock<EmoteSpamSettings>>,
        prattle: &Arc<RwLock<PrattleSettings>>,
        validator: &Arc<ConfigValidator>,
    ) -> Result<()> {
        let content = fs::read_to_string(path).await?;
        let is_toml = path.extension().map_or(false, |ext| ext == "toml");

        match file {
            ConfigFile::EmoteSpam => {
                let settings: EmoteSpamSettings = parse_settings(&content, is_toml)?;
                let settings = validator.validate_emote_spam(settings)?;
                *emote_spam.write().await = settings;
            }
            ConfigFile::Prattle => {
                let settings: PrattleSettings = parse_settings(&content, is_toml)?;
                validator.validate_prattle(&settings)?;
                *prattle.write().await = settings;
            }
        }
        Ok(())
    }

    async fn create_default_config(&self, file: ConfigFile) -> Result<()> {
        let path = self.config_dir.join(file.default_file_name());
        let content = match file {
            ConfigFile::EmoteSpam => {
                let settings = EmoteSpamSettings::default();
                *self.emote_spam.write().await = settings.clone();
                serde_yaml::to_string(&settings)?
            }
            ConfigFile::Prattle => {
                let settings = PrattleSettings::default();
                *self.prattle.write().await = settings.clone();
                serde_yaml::to_string(&settings)?
            }
        };

        fs::write(&path, content).await?;
        info!("Created default configuration: {}", path.display());
        Ok(())
    }

    /// Re-read one file on demand and broadcast the outcome
    pub async fn reload(&self, file: ConfigFile) -> Result<()> {
        let path = self
            .find_config_path(file)
            .ok_or_else(|| anyhow::anyhow!("No configuration file found for {}", file.stem()))?;
        Self::reload_and_notify(
            file,
            &path,
            &self.emote_spam,
            &self.prattle,
            &self.validator,
            &self.change_notifier,
        )
        .await
    }

    async fn reload_and_notify(
        file: ConfigFile,
        path: &Path,
        emote_spam: &Arc<RwLock<EmoteSpamSettings>>,
        prattle: &Arc<RwLock<PrattleSettings>>,
        validator: &Arc<ConfigValidator>,
        change_notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) -> Result<()> {
        let name = display_name(path);
        info!("Configuration file {} changed, reloading...", name);

        match Self::reload_config(file, path, emote_spam, prattle, validator).await {
            Ok(()) => {
                let event = match file {
                    ConfigFile::EmoteSpam => ConfigChangeEvent::EmoteSpamUpdated { file: name },
                    ConfigFile::Prattle => ConfigChangeEvent::PrattleUpdated { file: name },
                };
                let _ = change_notifier.send(event);
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload {}, keeping previous settings: {}", name, e);
                let _ = change_notifier.send(ConfigChangeEvent::ValidationError {
                    file: name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Setup file watchers for hot-reloading
    async fn setup_file_watchers(&self) -> Result<()> {
        let emote_spam = self.emote_spam.clone();
        let prattle = self.prattle.clone();
        let validator = self.validator.clone();
        let change_notifier = self.change_notifier.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&self.config_dir, RecursiveMode::NonRecursive)?;
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            // File -> (changed path, reload deadline)
            let mut pending: HashMap<ConfigFile, (PathBuf, Instant)> = HashMap::new();

            loop {
                let next_due = pending.values().map(|(_, due)| *due).min();

                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else {
                            break;
                        };
                        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            continue;
                        }

                        for path in event.paths {
                            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                                continue;
                            };
                            let Some(file) = ConfigFile::from_file_name(filename) else {
                                debug!("Ignoring change to non-config file: {}", filename);
                                continue;
                            };
                            // Every change restarts the quiet period for that file
                            pending.insert(file, (path, Instant::now() + RELOAD_DEBOUNCE));
                        }
                    }
                    _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                        let now = Instant::now();
                        let due: Vec<ConfigFile> = pending
                            .iter()
                            .filter(|(_, (_, deadline))| *deadline <= now)
                            .map(|(file, _)| *file)
                            .collect();

                        for file in due {
                            let Some((path, _)) = pending.remove(&file) else {
                                continue;
                            };
                            // Failures are logged and broadcast inside
                            let _ = Self::reload_and_notify(
                                file,
                                &path,
                                &emote_spam,
                                &prattle,
                                &validator,
                                &change_notifier,
                            )
                            .await;
                        }
                    }
                }
            }
        });

        info!("File watchers setup for hot-reloading");
        Ok(())
    }

    pub async fn get_emote_spam_settings(&self) -> EmoteSpamSettings {
        self.emote_spam.read().await.clone()
    }

    pub async fn get_prattle_settings(&self) -> PrattleSettings {
        self.prattle.read().await.clone()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    pub async fn save_emote_spam_settings(&self, settings: EmoteSpamSettings) -> Result<()> {
        let settings = self.validator.validate_emote_spam(settings)?;
        let path = self.config_dir.join(ConfigFile::EmoteSpam.default_file_name());
        fs::write(&path, serde_yaml::to_string(&settings)?).await?;

        *self.emote_spam.write().await = settings;
        info!("Saved emote spam configuration to {}", path.display());
        let _ = self.change_notifier.send(ConfigChangeEvent::EmoteSpamUpdated { file: display_name(&path) });
        Ok(())
    }

    pub async fn save_prattle_settings(&self, settings: PrattleSettings) -> Result<()> {
        self.validator.validate_prattle(&settings)?;
        let path = self.config_dir.join(ConfigFile::Prattle.default_file_name());
        fs::write(&path, serde_yaml::to_string(&settings)?).await?;

        *self.prattle.write().await = settings;
        info!("Saved prattle configuration to {}", path.display());
        let _ = self.change_notifier.send(ConfigChangeEvent::PrattleUpdated { file: display_name(&path) });
        Ok(())
    }

    /// Forward validated changes to `handler` on a background task
    pub fn spawn_change_listener(&self, handler: Arc<dyn ConfigChangeHandler>) -> JoinHandle<()> {
        let mut receiver = self.subscribe_to_changes();
        let manager = self.clone();

        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Configuration listener lagged, {} event(s) skipped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Err(e) = manager.dispatch_change(handler.as_ref(), event).await {
                    error!("Failed to handle configuration change: {}", e);
                }
            }
        })
    }

    async fn dispatch_change(&self, handler: &dyn ConfigChangeHandler, event: ConfigChangeEvent) -> Result<()> {
        match event {
            ConfigChangeEvent::EmoteSpamUpdated { file } => {
                info!("Emote spam settings updated from {}", file);
                handler.handle_emote_spam_change(self.get_emote_spam_settings().await).await?;
            }
            ConfigChangeEvent::PrattleUpdated { file } => {
                info!("Prattle settings updated from {}", file);
                handler.handle_prattle_change(self.get_prattle_settings().await).await?;
            }
            ConfigChangeEvent::ValidationError { file, error } => {
                error!("Configuration validation error in {}: {}", file, error);
            }
            ConfigChangeEvent::ReloadComplete { files_updated } => {
                info!("Configuration reload complete for files: {:?}", files_updated);
            }
        }
        Ok(())
    }
}

fn parse_settings<T: serde::de::DeserializeOwned>(content: &str, is_toml: bool) -> Result<T> {
    if is_toml {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
