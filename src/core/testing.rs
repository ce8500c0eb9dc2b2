//! Test doubles for the collaborator traits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::conversation::{ConversationHandle, ConversationStore};
use crate::core::task::{MediaRef, Payload, Task, UserKey};
use crate::providers::{
    CompletionService, ProviderError, Services, SpeechService, TranscriptionService,
};
use crate::transport::{Presence, Transport, TransportError};

/// Replies "re: <text>" unless a canned reply is set; "fail" always errors.
#[derive(Default)]
pub struct FakeCompletion {
    replies: Mutex<HashMap<String, String>>,
    asked: Mutex<Vec<String>>,
    threads: Mutex<Vec<Option<String>>>,
}

impl FakeCompletion {
    pub fn reply_to(&self, text: &str, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(text.to_string(), reply.to_string());
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    /// Thread bound to the conversation at each `ask`, in call order.
    pub fn threads_seen(&self) -> Vec<Option<String>> {
        self.threads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn ask(
        &self,
        _assistant_id: &str,
        text: &str,
        context: &ConversationHandle,
    ) -> crate::providers::Result<String> {
        self.asked.lock().unwrap().push(text.to_string());
        self.threads.lock().unwrap().push(context.thread_id());
        tokio::time::sleep(Duration::from_millis(2)).await;

        if text == "fail" {
            return Err(ProviderError::ApiError("HTTP 500: boom".to_string()));
        }
        if context.thread_id().is_none() {
            context
                .bind_thread(&format!("thread_{}", context.user_key()))
                .await;
        }

        let canned = self.replies.lock().unwrap().get(text).cloned();
        Ok(canned.unwrap_or_else(|| format!("re: {}", text)))
    }
}

#[derive(Default)]
pub struct FakeTranscription {
    transcript: Mutex<String>,
    fail: AtomicBool,
}

impl FakeTranscription {
    pub fn set_transcript(&self, text: &str) {
        *self.transcript.lock().unwrap() = text.to_string();
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranscriptionService for FakeTranscription {
    async fn transcribe(&self, audio_path: &Path) -> crate::providers::Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::ApiError("HTTP 400: bad audio".to_string()));
        }
        assert!(audio_path.exists(), "transcribing a missing file");
        Ok(self.transcript.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    spoken: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn synthesize(&self, text: &str) -> crate::providers::Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(b"ID3fake".to_vec())
    }
}

pub struct Fakes {
    pub completion: Arc<FakeCompletion>,
    pub transcription: Arc<FakeTranscription>,
    pub speech: Arc<FakeSpeech>,
}

pub fn fake_services() -> (Services, Fakes) {
    let fakes = Fakes {
        completion: Arc::new(FakeCompletion::default()),
        transcription: Arc::new(FakeTranscription::default()),
        speech: Arc::new(FakeSpeech::default()),
    };
    let services = Services {
        completion: fakes.completion.clone(),
        transcription: fakes.transcription.clone(),
        speech: fakes.speech.clone(),
    };
    (services, fakes)
}

/// Everything a transport was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String, String),
    Presence(String, Presence),
    /// User key and whether the audio file existed when sent.
    Voice(String, bool),
}

pub struct RecordingTransport {
    dir: PathBuf,
    sent: Mutex<Vec<Sent>>,
    downloads: Mutex<Vec<PathBuf>>,
    fail_on: Option<String>,
}

impl RecordingTransport {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            sent: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    /// Make sending exactly this chunk fail.
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self, user_key: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(key, text) if key == user_key => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn downloads(&self) -> Vec<PathBuf> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, user_key: &UserKey, text: &str) -> crate::transport::Result<()> {
        tokio::task::yield_now().await;
        if self.fail_on.as_deref() == Some(text) {
            return Err(TransportError::Send("chat unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Text(user_key.to_string(), text.to_string()));
        Ok(())
    }

    async fn signal_presence(
        &self,
        user_key: &UserKey,
        presence: Presence,
    ) -> crate::transport::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Presence(user_key.to_string(), presence));
        Ok(())
    }

    async fn send_voice(&self, user_key: &UserKey, path: &Path) -> crate::transport::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Voice(user_key.to_string(), path.exists()));
        Ok(())
    }

    async fn save_incoming_media(
        &self,
        _user_key: &UserKey,
        media: &MediaRef,
    ) -> crate::transport::Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.{}", media.file_id, media.extension));
        tokio::fs::write(&path, b"OggS").await?;
        self.downloads.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

fn build_task(key: &str, payload: Payload, transport: Arc<RecordingTransport>) -> Task {
    let store = Arc::new(ConversationStore::in_memory());
    let key = UserKey::from(key);
    let context = store.handle(&key);
    Task::new(key, payload, transport, context)
}

pub fn text_task(key: &str, text: &str, transport: Arc<RecordingTransport>) -> Task {
    build_task(key, Payload::Text(text.to_string()), transport)
}

pub fn reset_task(key: &str, transport: Arc<RecordingTransport>) -> Task {
    build_task(key, Payload::Reset, transport)
}

pub fn voice_task(key: &str, file_id: &str, transport: Arc<RecordingTransport>) -> Task {
    let media = MediaRef {
        file_id: file_id.to_string(),
        extension: "ogg".to_string(),
    };
    build_task(key, Payload::Voice(media), transport)
}
