//! Model service traits for Threadline.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::core::conversation::ConversationHandle;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Run {run_id} ended with status {status}")]
    RunFailed { run_id: String, status: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Turns a user message into the assistant's reply.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Ask `assistant_id` about `text` within the conversation behind
    /// `context`, returning the reply text.
    async fn ask(
        &self,
        assistant_id: &str,
        text: &str,
        context: &ConversationHandle,
    ) -> Result<String>;
}

/// Speech to text.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// Text to speech. Returns encoded audio (mp3).
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
