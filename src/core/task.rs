//! One unit of work for one user.

use std::fmt;
use std::sync::Arc;

use crate::core::conversation::ConversationHandle;
use crate::transport::Transport;

/// Opaque, stable identifier of a conversation (the Telegram chat id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey(String);

impl UserKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Reference to an inbound media artifact still held by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    /// File extension without the dot, e.g. "ogg".
    pub extension: String,
}

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Voice(MediaRef),
    /// Forget the conversation thread. Queued like any message so it takes
    /// effect after the user's earlier messages are answered.
    Reset,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Voice(_) => "voice",
            Payload::Reset => "reset",
        }
    }
}

/// Immutable once built. Moved from the dispatcher into the user's lane and
/// from there into the processor; never cloned.
pub struct Task {
    id: String,
    user_key: UserKey,
    payload: Payload,
    deliver: Arc<dyn Transport>,
    context: ConversationHandle,
    received_at: i64,
}

impl Task {
    pub fn new(
        user_key: UserKey,
        payload: Payload,
        deliver: Arc<dyn Transport>,
        context: ConversationHandle,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_key,
            payload,
            deliver,
            context,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_key(&self) -> &UserKey {
        &self.user_key
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn deliver(&self) -> &Arc<dyn Transport> {
        &self.deliver
    }

    pub fn context(&self) -> &ConversationHandle {
        &self.context
    }

    /// Unix timestamp (ms) of when the event was accepted.
    pub fn received_at(&self) -> i64 {
        self.received_at
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("user_key", &self.user_key)
            .field("payload", &self.payload)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::ConversationStore;
    use crate::transport::ConsoleTransport;

    #[test]
    fn test_task_new() {
        let store = Arc::new(ConversationStore::in_memory());
        let key = UserKey::from("42");
        let task = Task::new(
            key.clone(),
            Payload::Text("Hello".to_string()),
            Arc::new(ConsoleTransport),
            store.handle(&key),
        );

        assert!(!task.id().is_empty());
        assert_eq!(task.user_key().as_str(), "42");
        assert_eq!(task.payload().kind(), "text");
        assert_eq!(task.context().user_key(), &key);
        assert!(task.received_at() > 0);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let store = Arc::new(ConversationStore::in_memory());
        let key = UserKey::from("42");
        let make = || {
            Task::new(
                key.clone(),
                Payload::Text("x".to_string()),
                Arc::new(ConsoleTransport),
                store.handle(&key),
            )
        };
        assert_ne!(make().id().to_string(), make().id().to_string());
    }
}
