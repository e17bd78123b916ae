//! Discovery loop: keeps processing undiscovered documents one at a time.
//!
//! Each scan lists undiscovered documents and, for every one without an
//! active job, submits it, waits for it to finish and pauses
//! `job_interval`. After a scan the loop sleeps `retry_interval` or until
//! [`BackgroundProcessor::trigger`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{DEFAULT_JOB_INTERVAL_SECONDS, DEFAULT_PROCESSOR_RETRY_MINUTES};
use crate::error::{JobError, PapervisionError};
use crate::jobs::record::{DocumentId, JobState};
use crate::jobs::JobManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Pause between two jobs of the same scan.
    pub job_interval: Duration,
    /// Pause between scans.
    pub retry_interval: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            job_interval: Duration::from_secs(DEFAULT_JOB_INTERVAL_SECONDS),
            retry_interval: Duration::from_secs(DEFAULT_PROCESSOR_RETRY_MINUTES * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    pub running: bool,
    /// A scan is in progress.
    pub processing: bool,
    /// Document whose job the loop is waiting on.
    pub current_document: Option<DocumentId>,
}

/// Counts for one pass over the undiscovered documents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub found: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    processing: AtomicBool,
    current: Mutex<Option<DocumentId>>,
}

impl Shared {
    fn set_current(&self, document_id: Option<DocumentId>) {
        match self.current.lock() {
            Ok(mut guard) => *guard = document_id,
            Err(poisoned) => {
                log::warn!("Background processor lock was poisoned, recovering");
                *poisoned.into_inner() = document_id;
            }
        }
    }

    fn current(&self) -> Option<DocumentId> {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub struct BackgroundProcessor {
    manager: JobManager,
    config: BackgroundConfig,
    shared: Arc<Shared>,
    trigger_tx: broadcast::Sender<()>,
    stop_tx: watch::Sender<bool>,
}

impl BackgroundProcessor {
    pub fn new(manager: JobManager, config: BackgroundConfig) -> Self {
        let (trigger_tx, _) = broadcast::channel(4);
        let (stop_tx, _) = watch::channel(false);
        Self {
            manager,
            config,
            shared: Arc::new(Shared::default()),
            trigger_tx,
            stop_tx,
        }
    }

    /// Starts the loop on a tokio task. Returns `None` if it is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            log::warn!("Background processor is already running");
            return None;
        }
        self.stop_tx.send_replace(false);

        log::info!(
            "Starting background processor (job interval {}s, retry interval {}s)",
            self.config.job_interval.as_secs(),
            self.config.retry_interval.as_secs()
        );

        let worker = LoopWorker {
            manager: self.manager.clone(),
            config: self.config,
            shared: Arc::clone(&self.shared),
            trigger_rx: self.trigger_tx.subscribe(),
            stop_rx: self.stop_tx.subscribe(),
        };
        let span = tracing::info_span!("background");
        Some(tokio::spawn(worker.run().instrument(span)))
    }

    /// Forces an immediate scan if the loop is idle.
    pub fn trigger(&self) {
        // No receiver just means the loop is not running.
        let _ = self.trigger_tx.send(());
    }

    /// Ends the loop and cancels the job it is waiting on.
    pub fn stop(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            log::warn!("Background processor is not running");
            return;
        }
        log::info!("Stopping background processor");
        self.stop_tx.send_replace(true);
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            running: self.shared.running.load(Ordering::Acquire),
            processing: self.shared.processing.load(Ordering::Acquire),
            current_document: self.shared.current(),
        }
    }
}

struct LoopWorker {
    manager: JobManager,
    config: BackgroundConfig,
    shared: Arc<Shared>,
    trigger_rx: broadcast::Receiver<()>,
    stop_rx: watch::Receiver<bool>,
}

impl LoopWorker {
    fn stopped(&self) -> bool {
        *self.stop_rx.borrow() || self.manager.is_shutting_down()
    }

    async fn run(mut self) {
        loop {
            if self.stopped() {
                break;
            }

            self.shared.processing.store(true, Ordering::Release);
            match self.scan().await {
                Ok(summary) if summary.found == 0 => {
                    log::info!("No unprocessed documents found");
                }
                Ok(summary) => log::info!(
                    "Scan complete: {} completed, {} failed of {} found",
                    summary.completed,
                    summary.failed,
                    summary.found
                ),
                Err(e) => log::error!("Scan failed: {}", e),
            }
            self.shared.processing.store(false, Ordering::Release);

            if self.stopped() {
                break;
            }

            log::info!(
                "Waiting {}s before the next scan",
                self.config.retry_interval.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {},
                Ok(()) = self.trigger_rx.recv() => {
                    log::info!("Manual scan triggered");
                },
                _ = self.stop_rx.changed() => break,
            }
        }

        self.shared.set_current(None);
        self.shared.processing.store(false, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        log::info!("Background processor stopped");
    }

    async fn scan(&mut self) -> Result<ScanSummary, PapervisionError> {
        let candidates = self.manager.candidates().await?;
        let mut summary = ScanSummary {
            found: candidates.len(),
            ..ScanSummary::default()
        };

        for (index, document_id) in candidates.into_iter().enumerate() {
            if self.stopped() {
                break;
            }
            if index > 0 && !self.config.job_interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.job_interval) => {},
                    _ = self.stop_rx.changed() => break,
                }
            }

            match self.manager.submit(Some(document_id), false).await {
                Ok(_) => {}
                Err(PapervisionError::Job(JobError::Conflict { .. })) => {
                    log::debug!("Document {} already has an active job, skipping", document_id);
                    continue;
                }
                Err(PapervisionError::Job(JobError::ShuttingDown)) => break,
                Err(e) => {
                    log::warn!("Could not submit document {}: {}", document_id, e);
                    summary.failed += 1;
                    continue;
                }
            }

            self.shared.set_current(Some(document_id));
            let outcome = tokio::select! {
                result = self.manager.wait(document_id) => Some(result),
                _ = self.stop_rx.changed() => None,
            };
            self.shared.set_current(None);

            match outcome {
                Some(Ok(record)) if record.state == JobState::Completed => summary.completed += 1,
                Some(Ok(record)) => {
                    log::warn!("Document {}: {}", document_id, record.status_description());
                    if record.state == JobState::Failed {
                        summary.failed += 1;
                    }
                }
                Some(Err(e)) => log::warn!("Lost track of document {}: {}", document_id, e),
                None => {
                    log::info!("Stop requested, cancelling job for document {}", document_id);
                    if let Err(e) = self.manager.cancel(document_id) {
                        log::warn!("Failed to cancel document {}: {}", document_id, e);
                    }
                    break;
                }
            }
        }

        Ok(summary)
    }
}
