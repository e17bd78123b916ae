pub mod background;

pub use background::{BackgroundConfig, BackgroundProcessor, ProcessorStatus, ScanSummary};
