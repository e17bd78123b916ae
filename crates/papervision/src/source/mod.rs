//! Document source: where documents come from and where results go back to.

pub mod paperless;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::jobs::record::DocumentId;

pub use paperless::PaperlessClient;

/// Contract the lifecycle manager needs from a document-management service.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents that do not carry the completion marker yet, in the
    /// service's native order (oldest first by convention).
    async fn list_undiscovered(&self) -> Result<Vec<DocumentId>, SourceError>;

    /// Succeeds if the document exists. Fails with [`SourceError::NotFound`]
    /// otherwise.
    async fn check_exists(&self, document_id: DocumentId) -> Result<(), SourceError>;

    /// Raw bytes of the document's original file.
    async fn fetch_content(&self, document_id: DocumentId) -> Result<Vec<u8>, SourceError>;

    async fn attach_note(&self, document_id: DocumentId, text: &str) -> Result<(), SourceError>;

    /// Marks the document as processed so discovery skips it.
    async fn apply_completion_tag(&self, document_id: DocumentId) -> Result<(), SourceError>;

    /// Connectivity check used by health checks.
    async fn ping(&self) -> bool {
        true
    }
}
