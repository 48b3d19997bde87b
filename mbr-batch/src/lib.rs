//! mbr-batch library interface
//!
//! Streams MIDI records out of the document store, renders, normalizes and
//! encodes each one, commits the MP3 atomically and persists per-record
//! status. The binary in `main.rs` is a thin CLI over `BatchContext`.

pub mod config;
pub mod context;
pub mod error;
pub mod import;
pub mod models;
pub mod services;
pub mod store;
pub mod transforms;
pub mod utils;
pub mod workflow;

pub use crate::config::BatchConfig;
pub use crate::context::{BatchContext, DryRunReport};
pub use crate::error::{BatchError, CommitError, PipelineError, TransformError};
pub use crate::models::ProcessingStats;
pub use crate::workflow::{BatchOptions, BatchOrchestrator, StagePipeline};
