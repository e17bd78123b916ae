pub mod discovery;
pub mod manager;
pub mod progress;
pub mod record;
pub mod store;

pub use manager::{format_note, HealthStatus, JobManager};
pub use progress::{JobEvent, JobProgressBroadcaster};
pub use record::{DocumentId, JobRecord, JobState};
pub use store::{CancelOutcome, JobSnapshot, JobStore};
