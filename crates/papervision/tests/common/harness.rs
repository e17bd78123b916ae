//! Test harness wiring a [`JobManager`] to fakes and a temp data directory.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use papervision::{DocumentId, JobManager, JobState, ManagerConfig};

use super::fakes::{FakeEngine, FakeSource};

/// Upper bound for anything a test waits on.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub struct TestHarness {
    temp_dir: TempDir,
    pub source: Arc<FakeSource>,
    pub engine: Arc<FakeEngine>,
    pub manager: JobManager,
}

impl TestHarness {
    pub fn new(source: FakeSource, engine: FakeEngine) -> Self {
        Self::with_config(source, engine, |_| {})
    }

    pub fn with_config<F>(source: FakeSource, engine: FakeEngine, configure: F) -> Self
    where
        F: FnOnce(&mut ManagerConfig),
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = ManagerConfig {
            data_dir: temp_dir.path().join("data"),
            ..ManagerConfig::default()
        };
        configure(&mut config);

        let source = Arc::new(source);
        let engine = Arc::new(engine);
        let manager = JobManager::new(source.clone(), engine.clone(), config);
        Self {
            temp_dir,
            source,
            engine,
            manager,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.manager.config().data_dir.as_path()
    }

    pub fn state(&self, id: u64) -> JobState {
        self.manager.get(DocumentId(id)).expect("job exists").state
    }

    /// Waits until the job is in `state`.
    pub async fn wait_for_state(&self, id: u64, state: JobState) {
        let manager = self.manager.clone();
        eventually(move || {
            manager
                .get(DocumentId(id))
                .map(|r| r.state == state)
                .unwrap_or(false)
        })
        .await;
    }
}

/// Polls `condition` until it holds, panicking after [`WAIT_LIMIT`].
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    let result = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within {:?}", WAIT_LIMIT);
}
