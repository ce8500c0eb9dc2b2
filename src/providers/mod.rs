//! Model service providers: completion, transcription and speech.

use std::sync::Arc;

pub mod openai;
pub mod provider;

pub use openai::OpenAiClient;
pub use provider::{
    CompletionService, ProviderError, Result, SpeechService, TranscriptionService,
};

use crate::config::OpenAiConfig;

/// The three model services a processor needs.
#[derive(Clone)]
pub struct Services {
    pub completion: Arc<dyn CompletionService>,
    pub transcription: Arc<dyn TranscriptionService>,
    pub speech: Arc<dyn SpeechService>,
}

/// Build all services from one OpenAI client.
pub fn create_services(config: &OpenAiConfig) -> Result<Services> {
    let client = Arc::new(OpenAiClient::from_config(config)?);
    Ok(Services {
        completion: client.clone(),
        transcription: client.clone(),
        speech: client,
    })
}
