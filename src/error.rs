//! Error types for Threadline.

use thiserror::Error;

use crate::providers::ProviderError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound event could not be turned into a task.
    #[error("Task construction error: {0}")]
    TaskConstruction(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Delivery failed for {failed} of {total} chunks")]
    Delivery { failed: usize, total: usize },

    #[error("Web error: {0}")]
    Web(String),
}
