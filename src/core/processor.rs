//! Task processing: ask the assistant, then deliver the reply in order.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::core::chunking::{prepare_chunks, strip_citations, SplitPolicy};
use crate::core::task::{MediaRef, Payload, Task};
use crate::error::{Error, Result};
use crate::providers::{ProviderError, Services};
use crate::transport::Presence;

pub const RESET_REPLY: &str = "Conversation reset. Your next message starts a new thread.";
pub const NOTHING_TO_RESET_REPLY: &str = "Nothing to reset.";

/// Performs one task to completion. Called by the serializer with at most one
/// task per user in flight.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: Task) -> Result<()>;
}

/// The production processor: completion (and speech, for voice) through the
/// model services, chunked delivery through the task's transport.
pub struct ReplyProcessor {
    services: Services,
    assistant_id: String,
    media_dir: PathBuf,
    max_chunk_chars: usize,
}

impl ReplyProcessor {
    pub fn new(
        services: Services,
        assistant_id: impl Into<String>,
        media_dir: PathBuf,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            services,
            assistant_id: assistant_id.into(),
            media_dir,
            max_chunk_chars,
        }
    }

    async fn signal(&self, task: &Task, presence: Presence) {
        if let Err(e) = task.deliver().signal_presence(task.user_key(), presence).await {
            tracing::warn!(user = %task.user_key(), "Failed to signal {:?}: {}", presence, e);
        }
    }

    async fn ask(&self, task: &Task, text: &str) -> Result<String> {
        let response = self
            .services
            .completion
            .ask(&self.assistant_id, text, task.context())
            .await?;
        tracing::info!(
            user = %task.user_key(),
            task = task.id(),
            "Got response ({} bytes)",
            response.len()
        );
        Ok(response)
    }

    async fn deliver_chunks(&self, task: &Task, response: &str, policy: SplitPolicy) -> Result<()> {
        let chunks = prepare_chunks(response, policy, self.max_chunk_chars);
        if chunks.is_empty() {
            tracing::warn!(user = %task.user_key(), task = task.id(), "Response had no deliverable text");
            return Ok(());
        }

        let total = chunks.len();
        let failed = task.deliver().send_chunks(task.user_key(), &chunks).await;
        tracing::debug!(
            user = %task.user_key(),
            task = task.id(),
            "Delivered {} of {} chunks",
            total - failed,
            total
        );

        if failed > 0 {
            return Err(Error::Delivery { failed, total });
        }
        Ok(())
    }

    async fn answer_text(&self, task: &Task, text: &str) -> Result<()> {
        self.signal(task, Presence::Typing).await;
        let response = self.ask(task, text).await?;
        self.deliver_chunks(task, &response, SplitPolicy::Paragraphs)
            .await
    }

    async fn forget_thread(&self, task: &Task) -> Result<()> {
        let reply = if task.context().reset().await {
            RESET_REPLY
        } else {
            NOTHING_TO_RESET_REPLY
        };
        task.deliver().send_text(task.user_key(), reply).await?;
        Ok(())
    }

    async fn answer_voice(&self, task: &Task, media: &MediaRef) -> Result<()> {
        self.signal(task, Presence::RecordingVoice).await;
        let source = task
            .deliver()
            .save_incoming_media(task.user_key(), media)
            .await?;

        let result = self.answer_recording(task, &source).await;
        remove_quietly(&source).await;
        result
    }

    async fn answer_recording(&self, task: &Task, source: &Path) -> Result<()> {
        let transcript = self.services.transcription.transcribe(source).await?;
        if transcript.trim().is_empty() {
            return Err(ProviderError::ParseError("Empty transcription".to_string()).into());
        }
        tracing::debug!(user = %task.user_key(), "Transcribed {} chars", transcript.len());

        let response = self.ask(task, &transcript).await?;
        let delivered = self
            .deliver_chunks(task, &response, SplitPolicy::Sentences)
            .await;

        let spoken = strip_citations(&response);
        if spoken.is_empty() {
            return delivered;
        }

        let audio = self.services.speech.synthesize(&spoken).await?;
        tokio::fs::create_dir_all(&self.media_dir).await?;
        let reply_path = self.media_dir.join(format!("{}.mp3", task.id()));

        let sent = match tokio::fs::write(&reply_path, &audio).await {
            Ok(()) => task
                .deliver()
                .send_voice(task.user_key(), &reply_path)
                .await
                .map_err(Error::from),
            Err(e) => Err(Error::from(e)),
        };
        remove_quietly(&reply_path).await;

        sent?;
        delivered
    }
}

#[async_trait]
impl TaskProcessor for ReplyProcessor {
    async fn process(&self, task: Task) -> Result<()> {
        tracing::info!(
            user = %task.user_key(),
            task = task.id(),
            kind = task.payload().kind(),
            "Processing task"
        );

        match task.payload() {
            Payload::Text(text) => self.answer_text(&task, text).await,
            Payload::Voice(media) => self.answer_voice(&task, media).await,
            Payload::Reset => self.forget_thread(&task).await,
        }
    }
}

/// Delete a temporary file; failures are only logged.
async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
