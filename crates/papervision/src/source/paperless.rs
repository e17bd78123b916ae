//! Paperless-NGX REST client.
//!
//! The completion marker is a boolean custom field (named by
//! `SUMMARIZED_FIELD`). It is looked up once, created if missing, and
//! cached for the lifetime of the client.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;

use super::DocumentSource;
use crate::error::SourceError;
use crate::jobs::record::DocumentId;

/// Maximum length of response bodies quoted in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Documents requested per discovery page.
const DISCOVERY_PAGE_SIZE: u32 = 100;

/// Discovery stops paging once it has this many unmarked documents.
const DISCOVERY_BATCH: usize = 100;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct Page<T> {
    /// Absolute URL of the next page, `null` on the last one.
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CustomField {
    id: u64,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CustomFieldValue {
    field: u64,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DocumentSummary {
    id: u64,
    #[serde(default)]
    custom_fields: Vec<CustomFieldValue>,
}

/// Truncates a response body so error messages stay readable.
fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

/// True if the document's marker field is set to `true`.
fn is_marked(document: &DocumentSummary, field_id: u64) -> bool {
    document
        .custom_fields
        .iter()
        .any(|f| f.field == field_id && f.value == serde_json::Value::Bool(true))
}

/// Ids of the documents on a page that are not marked yet.
fn unmarked_ids(
    documents: &[DocumentSummary],
    field_id: u64,
) -> impl Iterator<Item = DocumentId> + '_ {
    documents
        .iter()
        .filter(move |doc| !is_marked(doc, field_id))
        .map(|doc| DocumentId(doc.id))
}

/// Resolves a pagination link. Paperless sends absolute URLs; relative ones
/// are joined onto the base URL.
fn resolve_link(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("{}/{}", base_url, link.trim_start_matches('/'))
    }
}

/// Existing custom field values with the marker set to `true`.
fn with_marker(mut fields: Vec<CustomFieldValue>, field_id: u64) -> Vec<CustomFieldValue> {
    match fields.iter_mut().find(|f| f.field == field_id) {
        Some(existing) => existing.value = serde_json::Value::Bool(true),
        None => fields.push(CustomFieldValue {
            field: field_id,
            value: serde_json::Value::Bool(true),
        }),
    }
    fields
}

async fn error_for_status(
    response: Response,
    document_id: Option<DocumentId>,
    action: &str,
) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        if let Some(id) = document_id {
            return Err(SourceError::NotFound(id));
        }
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Transport(format!(
        "{} failed with HTTP {}: {}",
        action,
        status.as_u16(),
        truncate_body(&body)
    )))
}

/// Client for the Paperless-NGX API.
pub struct PaperlessClient {
    client: Client,
    base_url: String,
    marker_field: String,
    marker_field_id: OnceCell<u64>,
}

impl PaperlessClient {
    pub fn new(
        base_url: &str,
        token: &SecretString,
        marker_field: &str,
    ) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", token.expose_secret()))
            .map_err(|e| SourceError::Transport(format!("Invalid API token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            marker_field: marker_field.to_string(),
            marker_field_id: OnceCell::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Id of the marker custom field, creating the field on first use.
    async fn marker_field_id(&self) -> Result<u64, SourceError> {
        self.marker_field_id
            .get_or_try_init(|| self.find_or_create_marker_field())
            .await
            .copied()
    }

    async fn find_or_create_marker_field(&self) -> Result<u64, SourceError> {
        let response = self
            .client
            .get(self.url("/api/custom_fields/"))
            .query(&[("page_size", "1000")])
            .send()
            .await?;
        let page: Page<CustomField> = error_for_status(response, None, "Listing custom fields")
            .await?
            .json()
            .await?;

        if let Some(field) = page.results.iter().find(|f| f.name == self.marker_field) {
            info!(
                "Found custom field '{}' with id {}",
                self.marker_field, field.id
            );
            return Ok(field.id);
        }

        let response = self
            .client
            .post(self.url("/api/custom_fields/"))
            .json(&json!({ "name": self.marker_field, "data_type": "boolean" }))
            .send()
            .await?;
        let field: CustomField = error_for_status(response, None, "Creating custom field")
            .await?
            .json()
            .await?;

        info!(
            "Created custom field '{}' with id {}",
            self.marker_field, field.id
        );
        Ok(field.id)
    }
}

#[async_trait]
impl DocumentSource for PaperlessClient {
    async fn list_undiscovered(&self) -> Result<Vec<DocumentId>, SourceError> {
        let field_id = self.marker_field_id().await?;

        // Oldest first, so marked documents pile up on the first pages.
        let mut next = Some(self.url(&format!(
            "/api/documents/?page_size={}&ordering=created",
            DISCOVERY_PAGE_SIZE
        )));
        let mut ids: Vec<DocumentId> = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let response = self.client.get(&url).send().await?;
            let page: Page<DocumentSummary> =
                error_for_status(response, None, "Listing documents")
                    .await?
                    .json()
                    .await?;
            pages += 1;
            ids.extend(unmarked_ids(&page.results, field_id));

            if ids.len() >= DISCOVERY_BATCH {
                break;
            }
            next = page
                .next
                .map(|link| resolve_link(&self.base_url, &link))
                .filter(|link| *link != url);
        }

        info!(
            "Found {} documents without '{}' ({} page(s) read)",
            ids.len(),
            self.marker_field,
            pages
        );
        Ok(ids)
    }

    async fn check_exists(&self, document_id: DocumentId) -> Result<(), SourceError> {
        let response = self
            .client
            .get(self.url(&format!("/api/documents/{}/", document_id)))
            .send()
            .await?;
        error_for_status(response, Some(document_id), "Reading document").await?;
        Ok(())
    }

    async fn fetch_content(&self, document_id: DocumentId) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(self.url(&format!("/api/documents/{}/download/", document_id)))
            .send()
            .await?;
        let bytes = error_for_status(response, Some(document_id), "Download")
            .await?
            .bytes()
            .await?;

        debug!("Downloaded {} bytes for document {}", bytes.len(), document_id);
        Ok(bytes.to_vec())
    }

    async fn attach_note(&self, document_id: DocumentId, text: &str) -> Result<(), SourceError> {
        let response = self
            .client
            .post(self.url(&format!("/api/documents/{}/notes/", document_id)))
            .json(&json!({ "note": text }))
            .send()
            .await?;
        error_for_status(response, Some(document_id), "Adding note").await?;

        info!("Added note to document {}", document_id);
        Ok(())
    }

    async fn apply_completion_tag(&self, document_id: DocumentId) -> Result<(), SourceError> {
        let field_id = self.marker_field_id().await?;

        // Paperless replaces the whole custom field list on PATCH.
        let response = self
            .client
            .get(self.url(&format!("/api/documents/{}/", document_id)))
            .send()
            .await?;
        let document: DocumentSummary =
            error_for_status(response, Some(document_id), "Reading document")
                .await?
                .json()
                .await?;

        let fields = with_marker(document.custom_fields, field_id);
        let response = self
            .client
            .patch(self.url(&format!("/api/documents/{}/", document_id)))
            .json(&json!({ "custom_fields": fields }))
            .send()
            .await?;
        error_for_status(response, Some(document_id), "Setting custom field").await?;

        info!(
            "Set '{}' on document {}",
            self.marker_field, document_id
        );
        Ok(())
    }

    async fn ping(&self) -> bool {
        match self
            .client
            .get(self.url("/api/documents/"))
            .query(&[("page_size", "1")])
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Failed to connect to Paperless: {}", e);
                false
            }
        }
    }
}
