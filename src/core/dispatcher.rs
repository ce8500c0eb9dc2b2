//! Entry point for inbound events.

use std::sync::Arc;

use crate::core::conversation::ConversationStore;
use crate::core::serializer::{SubmitOutcome, UserSerializer};
use crate::core::task::{MediaRef, Payload, Task, UserKey};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// An inbound message as the transport saw it.
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    /// Conversation the reply goes to
    pub user_key: Option<String>,

    /// Display name, for logs
    pub sender: Option<String>,

    /// Message text or caption
    pub text: Option<String>,

    /// Voice note or audio attachment
    pub voice: Option<MediaRef>,

    /// The user asked to start a new conversation
    pub reset: bool,
}

impl InboundEvent {
    pub fn text(user_key: &str, text: &str) -> Self {
        Self {
            user_key: Some(user_key.to_string()),
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn voice(user_key: &str, media: MediaRef) -> Self {
        Self {
            user_key: Some(user_key.to_string()),
            voice: Some(media),
            ..Self::default()
        }
    }

    pub fn reset(user_key: &str) -> Self {
        Self {
            user_key: Some(user_key.to_string()),
            reset: true,
            ..Self::default()
        }
    }
}

/// Turns events into tasks and hands them to the serializer.
pub struct Dispatcher {
    serializer: UserSerializer,
    conversations: Arc<ConversationStore>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        serializer: UserSerializer,
        conversations: Arc<ConversationStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            serializer,
            conversations,
            transport,
        }
    }

    pub fn serializer(&self) -> &UserSerializer {
        &self.serializer
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    /// Handle one event. Never suspends, so events reach the serializer in
    /// the order they arrive. Malformed events are logged and dropped.
    pub fn on_event(&self, event: InboundEvent) -> Option<SubmitOutcome> {
        let sender = event.sender.clone().unwrap_or_else(|| "unknown".to_string());

        let task = match self.build_task(event) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("Dropping event from {}: {}", sender, e);
                return None;
            }
        };

        let user_key = task.user_key().clone();
        let task_id = task.id().to_string();
        let kind = task.payload().kind();
        let outcome = self.serializer.submit(user_key.clone(), task);

        match outcome {
            SubmitOutcome::Rejected => tracing::warn!(
                user = %user_key,
                task = %task_id,
                "Rejected {} message from {}: backlog full",
                kind,
                sender
            ),
            _ => tracing::info!(
                user = %user_key,
                task = %task_id,
                "Accepted {} message from {}: {:?}",
                kind,
                sender,
                outcome
            ),
        }

        Some(outcome)
    }

    /// Build a task for `event`. A reset request wins over content, and voice
    /// wins over text when both are present.
    pub fn build_task(&self, event: InboundEvent) -> Result<Task> {
        let user_key = event
            .user_key
            .filter(|k| !k.trim().is_empty())
            .map(UserKey::new)
            .ok_or_else(|| Error::TaskConstruction("event has no user key".to_string()))?;

        let payload = match (event.reset, event.voice, event.text) {
            (true, _, _) => Payload::Reset,
            (_, Some(media), _) if !media.file_id.is_empty() => Payload::Voice(media),
            (_, _, Some(text)) if !text.trim().is_empty() => Payload::Text(text),
            _ => {
                return Err(Error::TaskConstruction(
                    "event has neither text nor voice".to_string(),
                ))
            }
        };

        let context = self.conversations.handle(&user_key);
        Ok(Task::new(
            user_key,
            payload,
            Arc::clone(&self.transport),
            context,
        ))
    }
}
