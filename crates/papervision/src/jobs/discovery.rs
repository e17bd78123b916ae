//! Picks the next document to process when the caller names none.

use log::debug;

use crate::error::{JobError, PapervisionError};
use crate::jobs::record::DocumentId;
use crate::jobs::store::JobStore;
use crate::source::DocumentSource;

/// Undiscovered documents that have no active job, in the source's order.
pub async fn undiscovered_candidates(
    source: &dyn DocumentSource,
    store: &JobStore,
) -> Result<Vec<DocumentId>, PapervisionError> {
    let listed = source.list_undiscovered().await?;
    let total = listed.len();
    let candidates: Vec<DocumentId> = listed
        .into_iter()
        .filter(|id| !store.is_active(*id))
        .collect();
    debug!(
        "{} undiscovered document(s), {} without an active job",
        total,
        candidates.len()
    );
    Ok(candidates)
}

/// First undiscovered document without an active job.
///
/// Fails with [`JobError::NoCandidate`] when there is nothing to do.
pub async fn select_candidate(
    source: &dyn DocumentSource,
    store: &JobStore,
) -> Result<DocumentId, PapervisionError> {
    undiscovered_candidates(source, store)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| JobError::NoCandidate.into())
}
