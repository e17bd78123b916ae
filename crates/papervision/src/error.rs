use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::record::{DocumentId, JobState};
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum PapervisionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Document source error: {0}")]
    Source(#[from] SourceError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] SecretError),
}

/// Errors surfaced synchronously by the job store and lifecycle manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Document {document_id} already has an active job ({state})")]
    Conflict {
        document_id: DocumentId,
        state: JobState,
    },

    #[error("No job found for document {0}")]
    NotFound(DocumentId),

    #[error("No unprocessed document available")]
    NoCandidate,

    #[error("Either a document id or auto-discovery is required")]
    MissingTarget,

    #[error("Job manager is shutting down")]
    ShuttingDown,

    #[error("Invalid transition for document {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: DocumentId,
        from: JobState,
        to: JobState,
    },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Document {0} not found")]
    NotFound(DocumentId),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Unsupported document content: {0}")]
    UnsupportedContent(String),

    #[error("Failed to render document: {0}")]
    Render(String),

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        InferenceError::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PapervisionError>;
