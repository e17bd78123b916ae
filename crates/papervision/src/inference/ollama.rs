//! Ollama HTTP adapter: vision OCR followed by a text-only summary.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::Instrument;

use super::render::{self, RenderOptions};
use super::{InferenceEngine, InferenceOutput};
use crate::error::InferenceError;

/// Model family that marks a model as vision-capable.
const VISION_FAMILY: &str = "clip";

/// Minutes Ollama keeps the model loaded after the summary request.
const SUMMARY_KEEP_ALIVE: u32 = 5;

const MAX_ERROR_BODY_LENGTH: usize = 200;

const OCR_PROMPT: &str = "Transcribe all of the text in this image, keeping the original \
formatting and layout as closely as you can (high quality OCR). The image shows a text \
document, so continue all the way to the bottom of the page and do not skip any text.";

fn summary_prompt(text: &str) -> String {
    format!(
        "Write a comprehensive summary of the following document text:\n\n\
         {text}\n\n\
         Guidelines:\n\
         1. Capture the main points and key information clearly and concisely.\n\
         2. Keep important names, dates, amounts and other specific details.\n\
         3. Use bullet points or short paragraphs.\n\
         4. Start by naming the document type (invoice, contract, letter, report, ...).\n\
         5. Call out action items, deadlines and requirements.\n\
         6. Scale the summary length with the length of the document.\n\
         7. Stay factual and professional.\n\n\
         Answer in this format:\n\
         **Document Type:** [type]\n\
         **Summary:**\n\
         [summary]"
    )
}

/// What the configured model can do, as reported by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub has_vision: bool,
    pub families: Vec<String>,
    pub parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(default)]
    details: ModelDetails,
}

#[derive(Debug, Default, Deserialize)]
struct ModelDetails {
    #[serde(default)]
    families: Option<Vec<String>>,
    #[serde(default)]
    parameter_size: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<u32>,
}

fn capabilities_from_tags(
    tags: TagsResponse,
    model: &str,
) -> Result<ModelCapabilities, InferenceError> {
    let available: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
    let entry = tags
        .models
        .iter()
        .find(|m| m.name == model)
        .ok_or_else(|| {
            InferenceError::Unavailable(format!(
                "Model {} not found (available: {})",
                model,
                available.join(", ")
            ))
        })?;

    let families = entry.details.families.clone().unwrap_or_default();
    Ok(ModelCapabilities {
        has_vision: families.iter().any(|f| f == VISION_FAMILY),
        families,
        parameter_size: entry.details.parameter_size.clone(),
    })
}

/// Extracts the generated text from a non-streaming response body.
fn parse_generate_response(body: &serde_json::Value) -> Result<String, InferenceError> {
    if let Some(text) = body.get("response").and_then(|v| v.as_str()) {
        return Ok(text.to_string());
    }
    if let Some(text) = body
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
    {
        return Ok(text.to_string());
    }

    let mut preview = body.to_string();
    if preview.len() > MAX_ERROR_BODY_LENGTH {
        let cut = (0..=MAX_ERROR_BODY_LENGTH)
            .rev()
            .find(|i| preview.is_char_boundary(*i))
            .unwrap_or(0);
        preview.truncate(cut);
        preview.push_str("...");
    }
    Err(InferenceError::MalformedOutput(format!(
        "Unexpected response format: {}",
        preview
    )))
}

/// Client for an Ollama server.
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    render: RenderOptions,
    capabilities: OnceCell<ModelCapabilities>,
}

impl OllamaClient {
    /// `timeout` bounds every request; it should match the job timeout.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            render: RenderOptions::default(),
            capabilities: OnceCell::new(),
        })
    }

    /// How PDFs are rasterised before OCR.
    pub fn with_render_options(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    fn request_error(&self, err: reqwest::Error) -> InferenceError {
        if err.is_timeout() {
            InferenceError::Timeout(self.timeout)
        } else {
            InferenceError::from(err)
        }
    }

    /// Looks up the configured model once and caches what it supports.
    pub async fn capabilities(&self) -> Result<&ModelCapabilities, InferenceError> {
        self.capabilities
            .get_or_try_init(|| self.fetch_capabilities())
            .await
    }

    async fn fetch_capabilities(&self) -> Result<ModelCapabilities, InferenceError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Unavailable(format!(
                "Listing models failed with HTTP {}",
                status.as_u16()
            )));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedOutput(format!("Invalid model list: {}", e)))?;

        let caps = capabilities_from_tags(tags, &self.model)?;
        info!(
            "Model {} capabilities: vision={}, families={:?}",
            self.model, caps.has_vision, caps.families
        );
        Ok(caps)
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
            return Err(InferenceError::Unavailable(format!(
                "Ollama returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::MalformedOutput(format!("Response is not JSON: {}", e))
            }
        })?;
        parse_generate_response(&body)
    }
}

#[async_trait]
impl InferenceEngine for OllamaClient {
    async fn process(&self, content: &[u8]) -> Result<InferenceOutput, InferenceError> {
        let caps = self.capabilities().await?;
        if !caps.has_vision {
            return Err(InferenceError::UnsupportedModel(format!(
                "Model '{}' has families {:?} but needs '{}' for vision; \
                 switch to a vision model such as minicpm-v, llava or moondream",
                self.model, caps.families, VISION_FAMILY
            )));
        }

        let image = render::document_to_image(content.to_vec(), self.render)
            .instrument(tracing::info_span!("inference.render", size = content.len()))
            .await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image);
        debug!("Encoded {} byte image for the vision model", image.len());

        let ocr_text = self
            .generate(&GenerateRequest {
                model: &self.model,
                prompt: OCR_PROMPT,
                images: Some(vec![encoded]),
                stream: false,
                keep_alive: None,
            })
            .instrument(tracing::info_span!("inference.ocr", model = %self.model))
            .await?;
        if ocr_text.trim().is_empty() {
            warn!("Model returned no text for the document");
        }

        let prompt = summary_prompt(&ocr_text);
        let summary_text = self
            .generate(&GenerateRequest {
                model: &self.model,
                prompt: &prompt,
                images: None,
                stream: false,
                keep_alive: Some(SUMMARY_KEEP_ALIVE),
            })
            .instrument(tracing::info_span!("inference.summary", model = %self.model))
            .await?;

        info!(
            "Extracted {} chars of text and a {} char summary",
            ocr_text.len(),
            summary_text.len()
        );
        Ok(InferenceOutput {
            ocr_text,
            summary_text,
        })
    }

    async fn ping(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Failed to connect to Ollama: {}", e);
                false
            }
        }
    }
}
