//! Shared test utilities for papervision integration tests.
//!
//! - `FakeSource` / `FakeEngine`: in-memory collaborators
//! - `TestHarness`: a job manager over the fakes with a temp data directory
//! - `StubPaperless`: a loopback HTTP server speaking the Paperless API

pub mod fakes;
pub mod harness;
pub mod paperless_stub;

pub use fakes::{FakeEngine, FakeSource};
pub use harness::{eventually, TestHarness, WAIT_LIMIT};
pub use paperless_stub::StubPaperless;
