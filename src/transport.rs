//! Outbound transport seam: how replies reach a user.
//!
//! The Telegram adapter lives in `crate::telegram::transport`; the console
//! adapter below backs `threadline ask`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::task::{MediaRef, UserKey};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Media download failed: {0}")]
    Download(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Presence indicator shown while a task is being worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Typing,
    RecordingVoice,
}

/// Delivery handle for one user session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text chunk.
    async fn send_text(&self, user_key: &UserKey, text: &str) -> Result<()>;

    /// Show a presence indicator.
    async fn signal_presence(&self, user_key: &UserKey, presence: Presence) -> Result<()>;

    /// Send an audio file as a voice attachment.
    async fn send_voice(&self, user_key: &UserKey, path: &Path) -> Result<()>;

    /// Download an inbound media artifact to a local file.
    async fn save_incoming_media(&self, user_key: &UserKey, media: &MediaRef) -> Result<PathBuf>;

    /// Send chunks strictly in order, one at a time. Every chunk is attempted
    /// even after a failure; returns the number of chunks that failed.
    async fn send_chunks(&self, user_key: &UserKey, chunks: &[String]) -> usize {
        let mut failed = 0;
        for (index, chunk) in chunks.iter().enumerate() {
            if let Err(e) = self.send_text(user_key, chunk).await {
                tracing::error!(
                    user = %user_key,
                    chunk = index,
                    "Failed to deliver chunk: {}",
                    e
                );
                failed += 1;
            }
        }
        failed
    }
}

/// Prints replies to stdout. Used by the `ask` command.
#[derive(Debug, Default)]
pub struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_text(&self, _user_key: &UserKey, text: &str) -> Result<()> {
        println!("{}\n", text);
        Ok(())
    }

    async fn signal_presence(&self, _user_key: &UserKey, presence: Presence) -> Result<()> {
        tracing::debug!("Presence: {:?}", presence);
        Ok(())
    }

    async fn send_voice(&self, _user_key: &UserKey, path: &Path) -> Result<()> {
        println!("[voice reply: {}]\n", path.display());
        Ok(())
    }

    async fn save_incoming_media(&self, _user_key: &UserKey, media: &MediaRef) -> Result<PathBuf> {
        Err(TransportError::Unsupported(format!(
            "console cannot fetch media {}",
            media.file_id
        )))
    }
}
