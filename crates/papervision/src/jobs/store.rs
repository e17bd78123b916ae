//! In-memory job store keyed by document id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::JobError;
use crate::jobs::record::{DocumentId, JobRecord, JobState};

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still pending and is now cancelled.
    Cancelled,
    /// The job is being driven; it stops at its next state boundary.
    Requested,
    /// The job had already finished; nothing changed.
    AlreadyFinished,
}

/// Result of crossing a state boundary.
#[derive(Debug, Clone)]
pub enum Boundary {
    /// The job entered the requested state.
    Entered(JobRecord),
    /// A cancellation was pending; the job is now cancelled.
    Cancelled(JobRecord),
}

/// Point-in-time view over the store. Each call to [`JobStore::list`]
/// yields a fresh snapshot ordered by creation time.
#[derive(Debug)]
pub struct JobSnapshot {
    inner: std::vec::IntoIter<JobRecord>,
}

impl Iterator for JobSnapshot {
    type Item = JobRecord;

    fn next(&mut self) -> Option<JobRecord> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for JobSnapshot {}

/// Concurrency-safe mapping from document id to job record.
///
/// A single mutex guards the whole map. It is never held across an await
/// point, so readers always see the latest recorded state without waiting
/// on in-flight work.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<DocumentId, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, JobRecord>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Inserts a new pending record.
    ///
    /// A finished record for the same document is replaced; an active one
    /// makes this fail with [`JobError::Conflict`].
    pub fn create(&self, document_id: DocumentId) -> Result<JobRecord, JobError> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&document_id) {
            if !existing.is_terminal() {
                return Err(JobError::Conflict {
                    document_id,
                    state: existing.state,
                });
            }
        }

        let record = JobRecord::new(document_id);
        jobs.insert(document_id, record.clone());
        log::debug!("Created job for document {}", document_id);
        Ok(record)
    }

    pub fn get(&self, document_id: DocumentId) -> Result<JobRecord, JobError> {
        self.lock()
            .get(&document_id)
            .cloned()
            .ok_or(JobError::NotFound(document_id))
    }

    /// Snapshot of all records, oldest first.
    pub fn list(&self) -> JobSnapshot {
        let mut records: Vec<JobRecord> = self.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.document_id.cmp(&b.document_id))
        });
        JobSnapshot {
            inner: records.into_iter(),
        }
    }

    /// Removes a finished record and hands it back so the caller can delete
    /// its result files.
    pub fn remove(&self, document_id: DocumentId) -> Result<JobRecord, JobError> {
        let mut jobs = self.lock();
        let state = jobs
            .get(&document_id)
            .map(|r| r.state)
            .ok_or(JobError::NotFound(document_id))?;

        if !state.is_terminal() {
            return Err(JobError::Conflict { document_id, state });
        }

        jobs.remove(&document_id)
            .ok_or(JobError::NotFound(document_id))
    }

    /// True if the document has a non-terminal job.
    pub fn is_active(&self, document_id: DocumentId) -> bool {
        self.lock()
            .get(&document_id)
            .map(|r| !r.is_terminal())
            .unwrap_or(false)
    }

    pub fn active_ids(&self) -> Vec<DocumentId> {
        self.lock()
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.document_id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|r| !r.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flags a job for cancellation. Pending jobs are cancelled on the spot;
    /// finished jobs are left untouched.
    pub fn request_cancel(
        &self,
        document_id: DocumentId,
    ) -> Result<(CancelOutcome, JobRecord), JobError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&document_id)
            .ok_or(JobError::NotFound(document_id))?;

        if record.is_terminal() {
            return Ok((CancelOutcome::AlreadyFinished, record.clone()));
        }

        record.cancel_requested = true;
        if record.state == JobState::Pending {
            record.apply_transition(JobState::Cancelled, None);
            record.progress_message = Some("Cancelled before processing started".to_string());
            return Ok((CancelOutcome::Cancelled, record.clone()));
        }

        Ok((CancelOutcome::Requested, record.clone()))
    }

    /// Claims a pending job for a driver: Pending -> Downloading.
    ///
    /// Returns `Ok(None)` when the job is no longer pending (for instance it
    /// was cancelled while waiting for a slot) or a cancellation is pending,
    /// in which case the job is moved to Cancelled.
    pub fn claim(&self, document_id: DocumentId) -> Result<Option<JobRecord>, JobError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&document_id)
            .ok_or(JobError::NotFound(document_id))?;

        if record.state != JobState::Pending {
            return Ok(None);
        }
        if record.cancel_requested {
            record.apply_transition(JobState::Cancelled, None);
            return Ok(None);
        }

        record.apply_transition(JobState::Downloading, None);
        Ok(Some(record.clone()))
    }

    /// Crosses a state boundary, honouring a pending cancellation first.
    pub fn advance(&self, document_id: DocumentId, next: JobState) -> Result<Boundary, JobError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&document_id)
            .ok_or(JobError::NotFound(document_id))?;

        let from = record.state;
        if record.cancel_requested && from.can_transition_to(JobState::Cancelled) {
            record.apply_transition(JobState::Cancelled, None);
            return Ok(Boundary::Cancelled(record.clone()));
        }
        if !record.apply_transition(next, None) {
            return Err(JobError::InvalidTransition {
                document_id,
                from,
                to: next,
            });
        }
        Ok(Boundary::Entered(record.clone()))
    }

    /// Moves a job to Failed with the given error.
    pub fn fail(&self, document_id: DocumentId, error: String) -> Result<JobRecord, JobError> {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&document_id)
            .ok_or(JobError::NotFound(document_id))?;

        let from = record.state;
        if !record.apply_transition(JobState::Failed, Some(error)) {
            return Err(JobError::InvalidTransition {
                document_id,
                from,
                to: JobState::Failed,
            });
        }
        Ok(record.clone())
    }

    /// Mutates the non-state fields of a record.
    pub(crate) fn update<F>(&self, document_id: DocumentId, f: F) -> Result<JobRecord, JobError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&document_id)
            .ok_or(JobError::NotFound(document_id))?;
        let state = record.state;
        f(record);
        debug_assert_eq!(state, record.state, "update must not change state");
        Ok(record.clone())
    }
}
