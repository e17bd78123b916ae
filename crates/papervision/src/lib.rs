pub mod config;
pub mod error;
pub mod inference;
pub mod jobs;
pub mod secrets;
pub mod source;
pub mod storage;
pub mod worker;

pub use config::{load_dotenv, ManagerConfig, Settings};
pub use error::{
    ConfigError, InferenceError, JobError, PapervisionError, Result, SourceError, StorageError,
};
pub use inference::{InferenceEngine, InferenceOutput, OllamaClient, RenderOptions};
pub use jobs::{
    CancelOutcome, DocumentId, HealthStatus, JobEvent, JobManager, JobRecord, JobState,
};
pub use secrets::{resolve_secret, SecretError};
pub use source::{DocumentSource, PaperlessClient};
pub use storage::ResultStore;
pub use worker::{BackgroundConfig, BackgroundProcessor, ProcessorStatus};
