//! In-memory stand-ins for Paperless and Ollama.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use papervision::{DocumentId, DocumentSource, InferenceEngine, InferenceError, InferenceOutput, SourceError};

/// Document source backed by a map. Tagging a document removes it from the
/// undiscovered list, like setting the custom field does in Paperless.
pub struct FakeSource {
    documents: Mutex<HashMap<DocumentId, Vec<u8>>>,
    undiscovered: Mutex<Vec<DocumentId>>,
    notes: Mutex<Vec<(DocumentId, String)>>,
    tagged: Mutex<Vec<DocumentId>>,
    note_error: Option<String>,
    download_error: Option<String>,
    reachable: bool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            undiscovered: Mutex::new(Vec::new()),
            notes: Mutex::new(Vec::new()),
            tagged: Mutex::new(Vec::new()),
            note_error: None,
            download_error: None,
            reachable: true,
        }
    }

    /// Adds a document that can be downloaded but is not listed.
    pub fn with_document(self, id: u64, content: &[u8]) -> Self {
        self.documents
            .lock()
            .unwrap()
            .insert(DocumentId(id), content.to_vec());
        self
    }

    /// Adds documents that are downloadable and listed as undiscovered.
    pub fn with_undiscovered(self, ids: &[u64]) -> Self {
        for id in ids {
            self.add_undiscovered(*id);
        }
        self
    }

    pub fn failing_notes(mut self, message: &str) -> Self {
        self.note_error = Some(message.to_string());
        self
    }

    /// Documents exist but downloading them fails.
    pub fn failing_downloads(mut self, message: &str) -> Self {
        self.download_error = Some(message.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn add_undiscovered(&self, id: u64) {
        self.documents
            .lock()
            .unwrap()
            .insert(DocumentId(id), format!("%PDF-fake-{id}").into_bytes());
        self.undiscovered.lock().unwrap().push(DocumentId(id));
    }

    pub fn notes(&self) -> Vec<(DocumentId, String)> {
        self.notes.lock().unwrap().clone()
    }

    pub fn tagged(&self) -> Vec<DocumentId> {
        self.tagged.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn list_undiscovered(&self) -> Result<Vec<DocumentId>, SourceError> {
        Ok(self.undiscovered.lock().unwrap().clone())
    }

    async fn check_exists(&self, document_id: DocumentId) -> Result<(), SourceError> {
        if self.documents.lock().unwrap().contains_key(&document_id) {
            Ok(())
        } else {
            Err(SourceError::NotFound(document_id))
        }
    }

    async fn fetch_content(&self, document_id: DocumentId) -> Result<Vec<u8>, SourceError> {
        if let Some(message) = &self.download_error {
            return Err(SourceError::Transport(message.clone()));
        }
        self.documents
            .lock()
            .unwrap()
            .get(&document_id)
            .cloned()
            .ok_or(SourceError::NotFound(document_id))
    }

    async fn attach_note(&self, document_id: DocumentId, text: &str) -> Result<(), SourceError> {
        if let Some(message) = &self.note_error {
            return Err(SourceError::Transport(message.clone()));
        }
        self.notes
            .lock()
            .unwrap()
            .push((document_id, text.to_string()));
        Ok(())
    }

    async fn apply_completion_tag(&self, document_id: DocumentId) -> Result<(), SourceError> {
        self.tagged.lock().unwrap().push(document_id);
        self.undiscovered
            .lock()
            .unwrap()
            .retain(|id| *id != document_id);
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.reachable
    }
}

/// Inference engine returning a canned answer.
///
/// With a gate, every call waits for one permit, so tests can hold jobs in
/// Processing and release them with [`FakeEngine::release`].
pub struct FakeEngine {
    result: Result<InferenceOutput, String>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeEngine {
    pub fn returning(ocr: &str, summary: &str) -> Self {
        Self {
            result: Ok(InferenceOutput::new(ocr, summary)),
            gate: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            gate: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Lets `n` gated calls through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn process(&self, _content: &[u8]) -> Result<InferenceOutput, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map_err(InferenceError::Unavailable)
    }
}
