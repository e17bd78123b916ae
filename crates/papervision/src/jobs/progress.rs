//! Job event broadcaster for streaming state changes to interested callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::jobs::record::{DocumentId, JobRecord, JobState};

/// A state change or progress note for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub document_id: DocumentId,
    pub state: JobState,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(document_id: DocumentId, state: JobState, message: &str) -> Self {
        Self {
            document_id,
            state,
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Snapshot event describing a record as it currently is.
    pub fn from_record(record: &JobRecord) -> Self {
        let message = record
            .progress_message
            .clone()
            .unwrap_or_else(|| record.status_description());
        Self {
            document_id: record.document_id,
            state: record.state,
            message,
            error: record.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job events. Sending never blocks and never fails when nobody listens.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
