//! Core module - per-user queueing, processing, and conversation memory.
//!
//! This module contains the heart of Threadline's message processing:
//! - Tasks and the dispatcher that builds them from inbound events
//! - The per-user serializer (one in-flight task per user, FIFO)
//! - The reply processor and response chunking
//! - Conversation memory (assistant thread per user)

pub mod chunking;
pub mod conversation;
pub mod dispatcher;
pub mod processor;
pub mod serializer;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::{ConversationHandle, ConversationStore};
pub use dispatcher::{Dispatcher, InboundEvent};
pub use processor::{ReplyProcessor, TaskProcessor};
pub use serializer::{QueueLimits, QueueStats, SubmitOutcome, UserSerializer};
pub use task::{MediaRef, Payload, Task, UserKey};
