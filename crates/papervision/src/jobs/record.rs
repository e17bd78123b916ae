//! Job record and the processing state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a document in the document source. Also identifies its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        DocumentId(id)
    }
}

/// State of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Downloading,
    Processing,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Returns true for Completed, Failed and Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The happy path is strictly Pending -> Downloading -> Processing ->
    /// Uploading -> Completed. Failed and Cancelled are reachable from any
    /// non-terminal state. Terminal states never change.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobState::Failed | JobState::Cancelled => true,
            JobState::Downloading => self == JobState::Pending,
            JobState::Processing => self == JobState::Downloading,
            JobState::Uploading => self == JobState::Processing,
            JobState::Completed => self == JobState::Uploading,
            JobState::Pending => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Processing => "processing",
            JobState::Uploading => "uploading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One document's processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Document being processed; doubles as the job id.
    pub document_id: DocumentId,
    /// Current state.
    pub state: JobState,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When a driver claimed the job (Pending -> Downloading).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure description, only set when Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latest human-readable progress note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    /// Extracted text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    /// Generated summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
    /// Result files written for this attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    /// Set by cancel requests; observed at state boundaries.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl JobRecord {
    /// Creates a new pending record.
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            progress_message: None,
            ocr_text: None,
            summary_text: None,
            ocr_path: None,
            summary_path: None,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves the record to `next`, maintaining timestamps and the error field.
    ///
    /// Returns false (and leaves the record untouched) if the transition is
    /// not allowed.
    pub(crate) fn apply_transition(&mut self, next: JobState, error: Option<String>) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        if next == JobState::Downloading {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            // Keep finished_at >= started_at even under clock adjustments.
            let floor = self.started_at.unwrap_or(self.created_at);
            self.finished_at = Some(now.max(floor));
        }
        self.error = if next == JobState::Failed {
            Some(
                error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )
        } else {
            None
        };
        self.state = next;
        true
    }

    /// Seconds between start and finish (or now, if still running).
    pub fn duration_seconds(&self) -> Option<i64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - started).num_seconds())
    }

    /// Human-readable description of the current state.
    pub fn status_description(&self) -> String {
        match self.state {
            JobState::Pending => "Waiting to start processing".to_string(),
            JobState::Downloading => "Downloading document from Paperless".to_string(),
            JobState::Processing => "Processing with the vision model".to_string(),
            JobState::Uploading => "Uploading results to Paperless".to_string(),
            JobState::Completed => "Successfully completed".to_string(),
            JobState::Failed => format!(
                "Failed: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            ),
            JobState::Cancelled => "Cancelled".to_string(),
        }
    }
}
