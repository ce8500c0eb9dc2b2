//! Configuration loading for Threadline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Default listen port for the status server.
pub const DEFAULT_PORT: u16 = 3000;

/// Telegram rejects messages longer than this.
pub const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4096;

/// Get the Threadline home directory (~/.threadline).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".threadline"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.threadline/settings.json, then apply environment
/// overrides. A missing file is fine when the environment carries the values.
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;
    let mut settings = load_settings_from(&path)?;
    settings.apply_overrides(|name| std::env::var(name).ok());
    Ok(settings)
}

/// Load settings from an explicit path without environment overrides.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!("No settings file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Write settings as pretty JSON, creating the parent directory.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    tracing::info!("Saved settings to {}", path.display());
    Ok(())
}

/// Top-level settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    /// OpenAI assistant that answers every conversation.
    #[serde(default)]
    pub assistant_id: String,

    /// Listen port of the status server.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assistant_id: String::new(),
            port: DEFAULT_PORT,
            telegram: TelegramConfig::default(),
            openai: OpenAiConfig::default(),
            queue: QueueConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Telegram channel configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

/// OpenAI API configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub voice: String,
    /// Delay between run status polls.
    pub poll_interval_ms: u64,
    /// Give up on a run after this long.
    pub run_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            transcription_model: "whisper-1".to_string(),
            speech_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            poll_interval_ms: 1000,
            run_timeout_secs: 120,
        }
    }
}

/// What to do when a user's backlog is full.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the incoming task.
    #[default]
    RejectNewest,
    /// Evict the oldest task that has not started yet.
    DropOldest,
}

/// Per-user queue configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum tasks waiting behind the in-flight one. `None` means unbounded.
    pub max_pending_per_user: Option<usize>,
    pub overflow: OverflowPolicy,
    /// How long shutdown waits for in-flight drains.
    pub shutdown_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending_per_user: None,
            overflow: OverflowPolicy::default(),
            shutdown_grace_secs: 30,
        }
    }
}

/// Outbound delivery configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_chunk_chars: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: TELEGRAM_MAX_MESSAGE_CHARS,
        }
    }
}

impl Settings {
    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("ASSISTANT_ID").filter(|v| !v.trim().is_empty()) {
            self.assistant_id = id;
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!("Ignoring invalid PORT '{}': {}", port, e),
            }
        }
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.openai.base_url = url;
        }
    }

    /// Validate values that do not depend on which command runs.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.max_chunk_chars == 0 {
            return Err(Error::Config(
                "delivery.max_chunk_chars must be greater than zero".to_string(),
            ));
        }
        if self.queue.max_pending_per_user == Some(0) {
            return Err(Error::Config(
                "queue.max_pending_per_user must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate everything the assistant pipeline needs.
    pub fn validate_for_assistant(&self) -> Result<()> {
        self.validate()?;
        if self.assistant_id.trim().is_empty() {
            return Err(Error::Config(
                "assistant_id is not set (settings.json or ASSISTANT_ID)".to_string(),
            ));
        }
        if self.openai_api_key().is_none() {
            return Err(Error::Config(
                "openai.api_key is not set (settings.json or OPENAI_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate everything the Telegram bot needs.
    pub fn validate_for_bot(&self) -> Result<()> {
        self.validate_for_assistant()?;
        if self.bot_token().is_none() {
            return Err(Error::Config(
                "telegram.bot_token is not set (settings.json or TELEGRAM_BOT_TOKEN)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    pub fn openai_api_key(&self) -> Option<&str> {
        self.openai
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    /// Copy of the settings with secrets masked, for display.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        copy.telegram.bot_token = copy.telegram.bot_token.as_deref().map(mask_secret);
        copy.openai.api_key = copy.openai.api_key.as_deref().map(mask_secret);
        copy
    }
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}…", visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_json() {
        let settings: Settings = serde_json::from_str("{}").unwrap();

        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.openai.base_url, "https://api.openai.com/v1");
        assert_eq!(settings.queue.max_pending_per_user, None);
        assert_eq!(settings.queue.overflow, OverflowPolicy::RejectNewest);
        assert_eq!(settings.delivery.max_chunk_chars, TELEGRAM_MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let json = r#"{
            "assistant_id": "asst_1",
            "openai": { "voice": "nova" },
            "queue": { "max_pending_per_user": 5, "overflow": "drop_oldest" }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.openai.voice, "nova");
        assert_eq!(settings.openai.speech_model, "tts-1");
        assert_eq!(settings.queue.max_pending_per_user, Some(5));
        assert_eq!(settings.queue.overflow, OverflowPolicy::DropOldest);
        assert_eq!(settings.queue.shutdown_grace_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ASSISTANT_ID", "asst_env"),
            ("PORT", "8080"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("OPENAI_API_KEY", "sk-env"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.assistant_id, "asst_env");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.bot_token(), Some("123:abc"));
        assert_eq!(settings.openai_api_key(), Some("sk-env"));
        assert!(settings.validate_for_bot().is_ok());
    }

    #[test]
    fn test_invalid_port_override_is_ignored() {
        let mut settings = Settings::default();
        settings.apply_overrides(|name| (name == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(settings.port, DEFAULT_PORT);
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.validate_for_assistant().is_err());

        settings.assistant_id = "asst_1".to_string();
        settings.openai.api_key = Some("sk-1".to_string());
        assert!(settings.validate_for_assistant().is_ok());
        assert!(settings.validate_for_bot().is_err());

        settings.queue.max_pending_per_user = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.assistant_id = "asst_disk".to_string();
        settings.port = 4000;
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.assistant_id, "asst_disk");
        assert_eq!(loaded.port, 4000);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = load_settings_from(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.port, DEFAULT_PORT);
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut settings = Settings::default();
        settings.openai.api_key = Some("sk-secret-value".to_string());
        let shown = settings.redacted();
        assert_eq!(shown.openai.api_key.as_deref(), Some("sk-s…"));
        assert_eq!(shown.telegram.bot_token, None);
    }
}
