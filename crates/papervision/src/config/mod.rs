//! Environment-backed settings.
//!
//! Everything is read from environment variables, optionally seeded from a
//! `.env` file. The job manager itself only sees [`ManagerConfig`].

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::inference::render::{RenderOptions, DEFAULT_DPI, DEFAULT_MAX_PAGES};
use crate::secrets::{self, SecretError};
use crate::worker::BackgroundConfig;

pub const DEFAULT_PAPERLESS_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_SUMMARIZED_FIELD: &str = "summarized";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "minicpm-v:latest";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;
pub const DEFAULT_JOB_TIMEOUT_SECONDS: u64 = 3600;
pub const DEFAULT_JOB_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_PROCESSOR_RETRY_MINUTES: u64 = 5;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// What the job manager needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Jobs allowed past PENDING at the same time.
    pub max_concurrent_jobs: usize,
    /// Bound on the PROCESSING step.
    pub processing_timeout: Duration,
    pub data_dir: PathBuf,
    /// Keep downloaded bytes next to the results.
    pub debug: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            processing_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECONDS),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            debug: false,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub paperless_base_url: String,
    /// `None` when neither `PAPERLESS_TOKEN` nor `PAPERLESS_TOKEN_FILE` is set;
    /// reported by [`Settings::validate`].
    pub paperless_token: Option<SecretString>,
    pub summarized_field: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub data_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    pub start_background_processor: bool,
    pub job_interval: Duration,
    pub processor_retry: Duration,
    /// Rasterisation of PDFs before OCR.
    pub render: RenderOptions,
    pub debug: bool,
}

fn parse_number<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Settings {
    /// Reads settings from the process environment (call [`load_dotenv`] first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let token_value = get("PAPERLESS_TOKEN");
        let token_file = get("PAPERLESS_TOKEN_FILE");
        let paperless_token = match secrets::resolve_secret(token_value.as_deref(), token_file.as_deref()) {
            Ok(token) => Some(token),
            Err(SecretError::NoSourceProvided) => None,
            Err(e) => return Err(e.into()),
        };

        let job_timeout_secs =
            parse_number("JOB_TIMEOUT_SECONDS", get("JOB_TIMEOUT_SECONDS"), DEFAULT_JOB_TIMEOUT_SECONDS)?;
        let job_interval_secs = parse_number(
            "JOB_INTERVAL_SECONDS",
            get("JOB_INTERVAL_SECONDS"),
            DEFAULT_JOB_INTERVAL_SECONDS,
        )?;
        let retry_minutes = parse_number(
            "PROCESSOR_RETRY_MINUTES",
            get("PROCESSOR_RETRY_MINUTES"),
            DEFAULT_PROCESSOR_RETRY_MINUTES,
        )?;

        Ok(Self {
            paperless_base_url: get_or("PAPERLESS_BASE_URL", DEFAULT_PAPERLESS_BASE_URL),
            paperless_token,
            summarized_field: get_or("SUMMARIZED_FIELD", DEFAULT_SUMMARIZED_FIELD),
            ollama_base_url: get_or("OLLAMA_BASE_URL", DEFAULT_OLLAMA_BASE_URL),
            ollama_model: get_or("OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL),
            data_dir: PathBuf::from(get_or("DATA_DIR", DEFAULT_DATA_DIR)),
            max_concurrent_jobs: parse_number(
                "MAX_CONCURRENT_JOBS",
                get("MAX_CONCURRENT_JOBS"),
                DEFAULT_MAX_CONCURRENT_JOBS,
            )?,
            job_timeout: Duration::from_secs(job_timeout_secs),
            start_background_processor: parse_bool(
                "START_BACKGROUND_PROCESSOR",
                get("START_BACKGROUND_PROCESSOR"),
                true,
            )?,
            job_interval: Duration::from_secs(job_interval_secs),
            processor_retry: Duration::from_secs(retry_minutes.saturating_mul(60)),
            render: RenderOptions {
                dpi: parse_number("RENDER_DPI", get("RENDER_DPI"), DEFAULT_DPI)?,
                max_pages: parse_number("RENDER_MAX_PAGES", get("RENDER_MAX_PAGES"), DEFAULT_MAX_PAGES)?,
            },
            debug: parse_bool("DEBUG", get("DEBUG"), false)?,
        })
    }

    /// Checks every setting and reports all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.paperless_token.is_none() {
            errors.push("PAPERLESS_TOKEN or PAPERLESS_TOKEN_FILE is required".to_string());
        }
        if !is_http_url(&self.paperless_base_url) {
            errors.push(format!(
                "PAPERLESS_BASE_URL must be an http(s) URL, got '{}'",
                self.paperless_base_url
            ));
        }
        if !is_http_url(&self.ollama_base_url) {
            errors.push(format!(
                "OLLAMA_BASE_URL must be an http(s) URL, got '{}'",
                self.ollama_base_url
            ));
        }
        if self.ollama_model.trim().is_empty() {
            errors.push("OLLAMA_MODEL cannot be empty".to_string());
        }
        if self.summarized_field.trim().is_empty() {
            errors.push("SUMMARIZED_FIELD cannot be empty".to_string());
        }
        if self.max_concurrent_jobs == 0 {
            errors.push("MAX_CONCURRENT_JOBS must be at least 1".to_string());
        }
        if self.job_timeout.is_zero() {
            errors.push("JOB_TIMEOUT_SECONDS must be greater than 0".to_string());
        }
        if self.render.dpi == 0 {
            errors.push("RENDER_DPI must be greater than 0".to_string());
        }
        if self.render.max_pages == 0 {
            errors.push("RENDER_MAX_PAGES must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation { errors })
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            processing_timeout: self.job_timeout,
            data_dir: self.data_dir.clone(),
            debug: self.debug,
        }
    }

    pub fn background_config(&self) -> BackgroundConfig {
        BackgroundConfig {
            job_interval: self.job_interval,
            retry_interval: self.processor_retry,
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Configuration:");
        tracing::info!("  paperless:   url={}, field={}", self.paperless_base_url, self.summarized_field);
        tracing::info!("  ollama:      url={}, model={}", self.ollama_base_url, self.ollama_model);
        tracing::info!(
            "  jobs:        max_concurrent={}, timeout={}s, data_dir={}",
            self.max_concurrent_jobs,
            self.job_timeout.as_secs(),
            self.data_dir.display()
        );
        tracing::info!(
            "  render:      dpi={}, max_pages={}",
            self.render.dpi,
            self.render.max_pages
        );
        tracing::info!(
            "  background:  enabled={}, interval={}s, retry={}s",
            self.start_background_processor,
            self.job_interval.as_secs(),
            self.processor_retry.as_secs()
        );
    }

    /// A view safe to print or return from an API (no token).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "paperless": {
                "baseUrl": self.paperless_base_url,
                "tokenConfigured": self.paperless_token.is_some(),
                "summarizedField": self.summarized_field,
            },
            "ollama": {
                "baseUrl": self.ollama_base_url,
                "model": self.ollama_model,
                "renderDpi": self.render.dpi,
                "renderMaxPages": self.render.max_pages,
            },
            "jobs": {
                "dataDir": self.data_dir.display().to_string(),
                "maxConcurrentJobs": self.max_concurrent_jobs,
                "timeoutSeconds": self.job_timeout.as_secs(),
                "debug": self.debug,
            },
            "background": {
                "enabled": self.start_background_processor,
                "jobIntervalSeconds": self.job_interval.as_secs(),
                "retryIntervalSeconds": self.processor_retry.as_secs(),
            },
        })
    }
}
