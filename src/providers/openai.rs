//! OpenAI HTTP provider: Assistants threads/runs, Whisper, and TTS.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

use super::provider::{
    CompletionService, ProviderError, Result, SpeechService, TranscriptionService,
};
use crate::config::OpenAiConfig;
use crate::core::conversation::ConversationHandle;

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    transcription_model: String,
    speech_model: String,
    voice: String,
    poll_interval: Duration,
    run_timeout: Duration,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct NewRun<'a> {
    assistant_id: &'a str,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Deserialize, Debug)]
struct Run {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Run states after which polling stops.
fn is_terminal(status: &str) -> bool {
    matches!(
        status,
        "completed" | "failed" | "cancelled" | "expired" | "incomplete" | "requires_action"
    )
}

/// Concatenate the text parts of the newest assistant message for `run_id`.
fn extract_reply(list: MessageList, run_id: &str) -> Option<String> {
    let message = list.data.into_iter().find(|m| {
        m.role == "assistant" && m.run_id.as_deref().map_or(true, |id| id == run_id)
    })?;

    let text = message
        .content
        .into_iter()
        .filter(|part| part.kind == "text")
        .filter_map(|part| part.text.map(|t| t.value))
        .collect::<Vec<_>>()
        .join("\n\n");

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

impl OpenAiClient {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotAvailable("OPENAI_API_KEY not set".to_string()))?;

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transcription_model: config.transcription_model.clone(),
            speech_model: config.speech_model.clone(),
            voice: config.voice.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(50)),
            run_timeout: Duration::from_secs(config.run_timeout_secs.max(1)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Assistants endpoints need the beta header.
    fn assistants(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn check(response: Response) -> Result<Response> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!("HTTP {}: {}", status, text)));
        }
        Ok(response)
    }

    async fn create_thread(&self) -> Result<String> {
        let response = self
            .assistants(self.client.post(self.url("/threads")))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let created: Created = Self::check(response).await?.json().await?;
        tracing::debug!("Created assistant thread {}", created.id);
        Ok(created.id)
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()> {
        let response = self
            .assistants(
                self.client
                    .post(self.url(&format!("/threads/{}/messages", thread_id))),
            )
            .json(&NewMessage {
                role: "user",
                content: text,
            })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let response = self
            .assistants(self.client.post(self.url(&format!("/threads/{}/runs", thread_id))))
            .json(&NewRun { assistant_id })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let response = self
            .assistants(
                self.client
                    .get(self.url(&format!("/threads/{}/runs/{}", thread_id, run_id))),
            )
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> Result<Run> {
        let started = Instant::now();
        while !is_terminal(&run.status) {
            if started.elapsed() > self.run_timeout {
                tracing::warn!("Run {} still {} after {:?}", run.id, run.status, self.run_timeout);
                return Err(ProviderError::Timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
            run = self.get_run(thread_id, &run.id).await?;
        }
        Ok(run)
    }

    async fn latest_reply(&self, thread_id: &str, run_id: &str) -> Result<String> {
        let response = self
            .assistants(
                self.client
                    .get(self.url(&format!("/threads/{}/messages", thread_id)))
                    .query(&[("order", "desc"), ("limit", "5")]),
            )
            .send()
            .await?;
        let list: MessageList = Self::check(response).await?.json().await?;
        extract_reply(list, run_id)
            .ok_or_else(|| ProviderError::ParseError("Run produced no assistant text".to_string()))
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn ask(
        &self,
        assistant_id: &str,
        text: &str,
        context: &ConversationHandle,
    ) -> Result<String> {
        let thread_id = match context.thread_id() {
            Some(id) => id,
            None => {
                let id = self.create_thread().await?;
                context.bind_thread(&id).await;
                id
            }
        };

        self.add_message(&thread_id, text).await?;
        let run = self.start_run(&thread_id, assistant_id).await?;
        let run = self.wait_for_run(&thread_id, run).await?;

        if run.status != "completed" {
            return Err(ProviderError::RunFailed {
                run_id: run.id,
                status: run.status,
            });
        }

        let reply = self.latest_reply(&thread_id, &run.id).await?;
        context.record_turn().await;
        tracing::debug!(
            user = %context.user_key(),
            "Assistant replied ({} bytes)",
            reply.len()
        );
        Ok(reply)
    }
}

#[async_trait]
impl TranscriptionService for OpenAiClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.ogg")
            .to_string();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone());

        let response = self
            .client
            .post(self.url("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let transcription: TranscriptionResponse = Self::check(response).await?.json().await?;
        Ok(transcription.text)
    }
}

#[async_trait]
impl SpeechService for OpenAiClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.speech_model,
                input: text,
                voice: &self.voice,
                response_format: "mp3",
            })
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
