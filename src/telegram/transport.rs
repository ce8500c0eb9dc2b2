//! Telegram implementation of the outbound transport.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile};

use crate::core::task::{MediaRef, UserKey};
use crate::transport::{Presence, Result, Transport, TransportError};

const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramTransport {
    bot: Bot,
    token: String,
    files_dir: PathBuf,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot: Bot, token: impl Into<String>, files_dir: PathBuf) -> Self {
        Self {
            bot,
            token: token.into(),
            files_dir,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve a file id to its path on the Bot API file server.
    async fn file_path(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/bot{}/getFile", TELEGRAM_API, self.token);
        let value: serde_json::Value = self
            .client
            .get(url)
            .query(&[("file_id", file_id)])
            .send()
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?
            .json()
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;

        value
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(|p| p.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::Download("Telegram getFile returned no file_path".to_string())
            })
    }
}

/// Telegram chat id behind a user key.
pub fn chat_id(user_key: &UserKey) -> Result<ChatId> {
    user_key
        .as_str()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| TransportError::InvalidRecipient(user_key.to_string()))
}

/// Local file name for a downloaded artifact.
pub fn download_name(media: &MediaRef) -> String {
    let extension = media.extension.trim_start_matches('.');
    let extension = if extension.is_empty() { "bin" } else { extension };
    format!("telegram_{}.{}", ulid::Ulid::new(), extension)
}

fn send_error(e: teloxide::RequestError) -> TransportError {
    TransportError::Send(e.to_string())
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, user_key: &UserKey, text: &str) -> Result<()> {
        self.bot
            .send_message(chat_id(user_key)?, text)
            .await
            .map_err(send_error)?;
        Ok(())
    }

    async fn signal_presence(&self, user_key: &UserKey, presence: Presence) -> Result<()> {
        let action = match presence {
            Presence::Typing => ChatAction::Typing,
            Presence::RecordingVoice => ChatAction::RecordVoice,
        };
        self.bot
            .send_chat_action(chat_id(user_key)?, action)
            .await
            .map_err(send_error)?;
        Ok(())
    }

    async fn send_voice(&self, user_key: &UserKey, path: &Path) -> Result<()> {
        self.bot
            .send_voice(chat_id(user_key)?, InputFile::file(path.to_path_buf()))
            .await
            .map_err(send_error)?;
        Ok(())
    }

    async fn save_incoming_media(&self, user_key: &UserKey, media: &MediaRef) -> Result<PathBuf> {
        let file_path = self.file_path(&media.file_id).await?;
        let download_url = format!("{}/file/bot{}/{}", TELEGRAM_API, self.token, file_path);

        let bytes = self
            .client
            .get(download_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Download(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;

        tokio::fs::create_dir_all(&self.files_dir).await?;
        let path = self.files_dir.join(download_name(media));
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(
            user = %user_key,
            "Saved {} bytes of media to {}",
            bytes.len(),
            path.display()
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_id() {
        assert_eq!(chat_id(&UserKey::from("12345")).unwrap(), ChatId(12345));
        assert_eq!(
            chat_id(&UserKey::from("-100200300")).unwrap(),
            ChatId(-100200300)
        );
        assert!(matches!(
            chat_id(&UserKey::from("cli")),
            Err(TransportError::InvalidRecipient(_))
        ));
    }

    #[test]
    fn test_download_name() {
        let media = MediaRef {
            file_id: "abc".to_string(),
            extension: ".ogg".to_string(),
        };
        let name = download_name(&media);
        assert!(name.starts_with("telegram_"));
        assert!(name.ends_with(".ogg"));
        assert!(!name.contains(".."));

        let bare = MediaRef {
            file_id: "abc".to_string(),
            extension: String::new(),
        };
        assert!(download_name(&bare).ends_with(".bin"));
    }
}
