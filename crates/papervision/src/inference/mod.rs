pub mod ollama;
pub mod render;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

pub use ollama::OllamaClient;
pub use render::RenderOptions;

/// Text extracted from a document and its summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub ocr_text: String,
    pub summary_text: String,
}

impl InferenceOutput {
    pub fn new(ocr_text: impl Into<String>, summary_text: impl Into<String>) -> Self {
        Self {
            ocr_text: ocr_text.into(),
            summary_text: summary_text.into(),
        }
    }
}

/// Model service that reads a document and summarises it.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Runs OCR and summarisation over the raw document bytes.
    async fn process(&self, content: &[u8]) -> Result<InferenceOutput, InferenceError>;

    /// Whether the service is reachable.
    async fn ping(&self) -> bool {
        true
    }
}
