//! Job lifecycle manager.
//!
//! Owns the job store and drives every submitted job through
//! Pending -> Downloading -> Processing -> Uploading -> Completed on its own
//! tokio task. At most `max_concurrent_jobs` drivers hold a slot at a time;
//! the others wait in Pending. Cancellation is observed between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::config::ManagerConfig;
use crate::error::{InferenceError, JobError, PapervisionError, StorageError};
use crate::inference::{InferenceEngine, InferenceOutput};
use crate::jobs::discovery;
use crate::jobs::progress::{JobEvent, JobProgressBroadcaster};
use crate::jobs::record::{DocumentId, JobRecord, JobState};
use crate::jobs::store::{Boundary, CancelOutcome, JobSnapshot, JobStore};
use crate::source::DocumentSource;
use crate::storage::{ResultPaths, ResultStore};

/// Connectivity of both collaborators plus job counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    pub source_connected: bool,
    pub inference_connected: bool,
    pub active_jobs: usize,
    pub total_jobs: usize,
}

/// Note attached to the document once processing succeeds.
pub fn format_note(summary_text: &str, ocr_text: &str) -> String {
    format!(
        "**AI Generated Summary:**\n\n{}\n\n**OCR Extracted Text:**\n\n{}",
        summary_text, ocr_text
    )
}

/// Why a driver stopped before Completed.
enum Halt {
    Cancelled(JobRecord),
    Failed(String),
}

impl From<JobError> for Halt {
    fn from(err: JobError) -> Self {
        Halt::Failed(PapervisionError::from(err).to_string())
    }
}

fn failure(err: impl Into<PapervisionError>) -> Halt {
    Halt::Failed(err.into().to_string())
}

struct Inner {
    store: JobStore,
    events: JobProgressBroadcaster,
    source: Arc<dyn DocumentSource>,
    engine: Arc<dyn InferenceEngine>,
    results: ResultStore,
    slots: Arc<Semaphore>,
    config: ManagerConfig,
    shutting_down: AtomicBool,
}

/// Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        engine: Arc<dyn InferenceEngine>,
        config: ManagerConfig,
    ) -> Self {
        let permits = config.max_concurrent_jobs.max(1);
        let results = ResultStore::new(&config.data_dir, config.debug);
        Self {
            inner: Arc::new(Inner {
                store: JobStore::new(),
                events: JobProgressBroadcaster::default(),
                source,
                engine,
                results,
                slots: Arc::new(Semaphore::new(permits)),
                config,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn results(&self) -> &ResultStore {
        &self.inner.results
    }

    /// Live stream of job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Creates a job and starts driving it in the background.
    ///
    /// An explicit `document_id` wins over `auto_discover` and must exist in
    /// the source; an unknown one fails with
    /// [`SourceError::NotFound`](crate::error::SourceError::NotFound)
    /// before any job is recorded. With neither, the call fails with
    /// [`JobError::MissingTarget`].
    pub async fn submit(
        &self,
        document_id: Option<DocumentId>,
        auto_discover: bool,
    ) -> Result<JobRecord, PapervisionError> {
        if self.is_shutting_down() {
            return Err(JobError::ShuttingDown.into());
        }

        let document_id = match document_id {
            Some(id) => {
                self.inner.source.check_exists(id).await?;
                id
            }
            None if auto_discover => {
                discovery::select_candidate(self.inner.source.as_ref(), &self.inner.store).await?
            }
            None => return Err(JobError::MissingTarget.into()),
        };

        let record = self.inner.store.create(document_id)?;
        info!("Queued job for document {}", document_id);
        self.publish(&record, "Waiting to start processing");
        self.spawn_driver(document_id);
        Ok(record)
    }

    /// Undiscovered documents without an active job, in source order.
    pub async fn candidates(&self) -> Result<Vec<DocumentId>, PapervisionError> {
        discovery::undiscovered_candidates(self.inner.source.as_ref(), &self.inner.store).await
    }

    pub fn get(&self, document_id: DocumentId) -> Result<JobRecord, JobError> {
        self.inner.store.get(document_id)
    }

    pub fn list(&self) -> JobSnapshot {
        self.inner.store.list()
    }

    pub fn active_count(&self) -> usize {
        self.inner.store.active_count()
    }

    /// Requests cancellation. Pending jobs stop immediately; running jobs stop
    /// at their next state boundary; finished jobs are left alone.
    pub fn cancel(&self, document_id: DocumentId) -> Result<CancelOutcome, JobError> {
        let (outcome, record) = self.inner.store.request_cancel(document_id)?;
        match outcome {
            CancelOutcome::Cancelled => {
                info!("Cancelled pending job for document {}", document_id);
                self.inner.events.send(JobEvent::from_record(&record));
            }
            CancelOutcome::Requested => {
                info!(
                    "Cancellation requested for document {} ({})",
                    document_id, record.state
                );
            }
            CancelOutcome::AlreadyFinished => {
                info!(
                    "Job for document {} already finished ({}), nothing to cancel",
                    document_id, record.state
                );
            }
        }
        Ok(outcome)
    }

    /// Deletes a finished job and its result files.
    pub async fn remove(&self, document_id: DocumentId) -> Result<JobRecord, PapervisionError> {
        let record = self.inner.store.remove(document_id)?;
        let results = self.inner.results.clone();
        let removed = tokio::task::spawn_blocking(move || results.remove(document_id))
            .await
            .map_err(|e| StorageError::RemoveFile {
                path: self.inner.results.data_dir().to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })??;
        info!(
            "Removed job for document {} ({} result file(s) deleted)",
            document_id, removed
        );
        Ok(record)
    }

    /// Waits until the job reaches a terminal state.
    pub async fn wait(&self, document_id: DocumentId) -> Result<JobRecord, JobError> {
        let mut rx = self.subscribe();
        loop {
            let record = self.get(document_id)?;
            if record.is_terminal() {
                return Ok(record);
            }
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.get(document_id),
            }
        }
    }

    /// Waits until no job is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        while self.active_count() > 0 {
            if let Err(RecvError::Closed) = rx.recv().await {
                return;
            }
        }
    }

    pub async fn health(&self) -> HealthStatus {
        let (source_connected, inference_connected) =
            tokio::join!(self.inner.source.ping(), self.inner.engine.ping());
        HealthStatus {
            healthy: source_connected && inference_connected,
            source_connected,
            inference_connected,
            active_jobs: self.inner.store.active_count(),
            total_jobs: self.inner.store.len(),
        }
    }

    /// Stops accepting work and asks every active job to cancel.
    /// Returns how many jobs were asked.
    pub fn shutdown(&self) -> usize {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let active = self.inner.store.active_ids();
        info!("Shutting down job manager, cancelling {} job(s)", active.len());
        for document_id in &active {
            if let Err(e) = self.cancel(*document_id) {
                warn!("Failed to cancel job for document {}: {}", document_id, e);
            }
        }
        active.len()
    }

    fn publish(&self, record: &JobRecord, message: &str) {
        let mut event = JobEvent::new(record.document_id, record.state, message);
        event.error = record.error.clone();
        self.inner.events.send(event);
    }

    /// Records a progress note on the job and broadcasts it.
    fn progress(&self, document_id: DocumentId, message: &str) -> Result<JobRecord, Halt> {
        let record = self.inner.store.update(document_id, |r| {
            r.progress_message = Some(message.to_string());
        })?;
        self.publish(&record, message);
        Ok(record)
    }

    /// Crosses into `next` unless a cancellation is pending.
    fn enter(&self, document_id: DocumentId, next: JobState, message: &str) -> Result<JobRecord, Halt> {
        match self.inner.store.advance(document_id, next)? {
            Boundary::Entered(_) => {
                info!("Document {} -> {}", document_id, next);
                self.progress(document_id, message)
            }
            Boundary::Cancelled(record) => Err(Halt::Cancelled(record)),
        }
    }

    fn spawn_driver(&self, document_id: DocumentId) {
        let manager = self.clone();
        let span = tracing::info_span!("job", document_id = %document_id);
        tokio::spawn(async move { manager.drive(document_id).await }.instrument(span));
    }

    async fn drive(&self, document_id: DocumentId) {
        let _permit = match Arc::clone(&self.inner.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Job slots closed, cannot drive document {}", document_id);
                return;
            }
        };

        match self.inner.store.claim(document_id) {
            Ok(Some(_)) => {
                info!("Document {} -> {}", document_id, JobState::Downloading);
                if let Err(halt) = self.progress(document_id, "Downloading document from Paperless") {
                    self.finish(document_id, Err(halt));
                    return;
                }
            }
            Ok(None) => {
                // Cancelled while waiting for a slot.
                return;
            }
            Err(e) => {
                warn!("Job for document {} vanished before it started: {}", document_id, e);
                return;
            }
        }

        let outcome = self.run(document_id).await;
        self.finish(document_id, outcome);
    }

    async fn run(&self, document_id: DocumentId) -> Result<JobRecord, Halt> {
        let content = self
            .inner
            .source
            .fetch_content(document_id)
            .await
            .map_err(failure)?;
        info!("Downloaded {} bytes for document {}", content.len(), document_id);
        self.keep_raw(document_id, &content).await;

        self.enter(document_id, JobState::Processing, "Processing with the vision model")?;
        let output = self.infer(&content).await.map_err(failure)?;

        self.progress(document_id, "Saving results")?;
        let paths = self.persist(document_id, &output).await.map_err(failure)?;
        self.inner.store.update(document_id, |r| {
            r.ocr_text = Some(output.ocr_text.clone());
            r.summary_text = Some(output.summary_text.clone());
            r.ocr_path = Some(paths.ocr.clone());
            r.summary_path = Some(paths.summary.clone());
        })?;

        self.enter(document_id, JobState::Uploading, "Adding note to document")?;
        let note = format_note(&output.summary_text, &output.ocr_text);
        self.inner
            .source
            .attach_note(document_id, &note)
            .await
            .map_err(failure)?;

        self.progress(document_id, "Marking document as summarized")?;
        self.inner
            .source
            .apply_completion_tag(document_id)
            .await
            .map_err(failure)?;

        self.enter(document_id, JobState::Completed, "Successfully completed")
    }

    /// Runs inference bounded by the processing timeout.
    async fn infer(&self, content: &[u8]) -> Result<InferenceOutput, InferenceError> {
        let limit = self.inner.config.processing_timeout;
        match tokio::time::timeout(limit, self.inner.engine.process(content)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(limit)),
        }
    }

    async fn persist(
        &self,
        document_id: DocumentId,
        output: &InferenceOutput,
    ) -> Result<ResultPaths, StorageError> {
        let results = self.inner.results.clone();
        let (ocr, summary) = (output.ocr_text.clone(), output.summary_text.clone());
        tokio::task::spawn_blocking(move || results.write_results(document_id, &ocr, &summary))
            .await
            .map_err(|e| StorageError::WriteFile {
                path: self.inner.results.ocr_path(document_id),
                source: std::io::Error::other(e.to_string()),
            })?
    }

    /// Keeps the downloaded bytes in debug mode. Failures only warn.
    async fn keep_raw(&self, document_id: DocumentId, content: &[u8]) {
        if !self.inner.results.keeps_raw() {
            return;
        }
        let results = self.inner.results.clone();
        let bytes = content.to_vec();
        match tokio::task::spawn_blocking(move || results.write_raw(document_id, &bytes)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to keep raw content for document {}: {}", document_id, e),
            Err(e) => warn!("Raw content task failed for document {}: {}", document_id, e),
        }
    }

    fn finish(&self, document_id: DocumentId, outcome: Result<JobRecord, Halt>) {
        match outcome {
            Ok(record) => {
                info!(
                    "Job for document {} completed in {}s",
                    document_id,
                    record.duration_seconds().unwrap_or(0)
                );
            }
            Err(Halt::Cancelled(record)) => {
                info!("Job for document {} cancelled while {}", document_id, record.state);
                self.publish(&record, "Cancelled");
            }
            Err(Halt::Failed(message)) => {
                error!("Job for document {} failed: {}", document_id, message);
                match self.inner.store.fail(document_id, message) {
                    Ok(record) => {
                        let text = record.status_description();
                        self.publish(&record, &text);
                    }
                    Err(e) => warn!("Could not record failure for document {}: {}", document_id, e),
                }
            }
        }
    }
}
