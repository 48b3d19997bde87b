//! Batch workflow: per-record stage pipeline and the bounded orchestrator

pub mod orchestrator;
pub mod pipeline;
pub mod retry;

pub use orchestrator::{BatchOptions, BatchOrchestrator};
pub use pipeline::{PipelineSettings, StagePipeline};
pub use retry::RetryPolicy;
