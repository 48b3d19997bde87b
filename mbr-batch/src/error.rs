//! Error types for mbr-batch
//!
//! Per-record errors (`PipelineError`) are caught at the pipeline retry
//! boundary and persisted as `failed`; they never abort the batch.
//! Batch-level errors (`BatchError`) propagate out of the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::Stage;

/// External transform failure (render, normalize, encode)
#[derive(Debug, Error)]
pub enum TransformError {
    /// Transform binary missing or not executable
    #[error("{program} not available: {reason}")]
    NotAvailable { program: String, reason: String },

    /// Transform process exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// Normalizer measured no usable signal
    #[error("input is silent (measured integrated loudness {measured_lufs} LUFS)")]
    SilentInput { measured_lufs: f64 },

    /// Transform reported success but produced unusable output
    #[error("invalid transform output: {0}")]
    InvalidOutput(String),

    /// Tag embedding or read-back failed
    #[error("tagging failed: {0}")]
    Tagging(String),

    /// I/O error around the transform invocation
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output commit failure
#[derive(Debug, Error)]
pub enum CommitError {
    /// Target filesystem lacks room for the artifact
    #[error("insufficient space at {path}: need {required} bytes, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Another file already occupies the target path
    #[error("output path already taken: {path}")]
    TargetExists { path: PathBuf },

    /// Filesystem failure while copying or renaming
    #[error("commit I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CommitError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CommitError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Per-record pipeline failure
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Payload missing, hash missing, or no encoding yields a valid header
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Render/normalize/encode failure annotated with the failing stage
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: TransformError,
    },

    /// Output commit failure (space exhaustion, filesystem error)
    #[error("committing stage failed: {0}")]
    Commit(#[from] CommitError),

    /// Status persistence failure
    #[error("store error: {0}")]
    Store(#[from] mbr_common::Error),

    /// Scratch file allocation failure
    #[error("temp file error: {0}")]
    TempFile(std::io::Error),

    /// Unit panicked or was torn down unexpectedly
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub(crate) fn stage(stage: Stage, source: TransformError) -> Self {
        PipelineError::Stage { stage, source }
    }

    /// Stage in which the error surfaced, when it maps to one
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineError::MalformedPayload(_) => Some(Stage::Extracting),
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::Commit(_) => Some(Stage::Committing),
            _ => None,
        }
    }

    /// True when the normalizer reported a silent input
    pub fn is_silent_input(&self) -> bool {
        matches!(
            self,
            PipelineError::Stage {
                source: TransformError::SilentInput { .. },
                ..
            }
        )
    }
}

/// Batch-level error: aborts the whole run
#[derive(Debug, Error)]
pub enum BatchError {
    /// Fatal at startup, raised before any record is touched
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Cursor failure or store disconnect
    #[error("store error: {0}")]
    Store(#[from] mbr_common::Error),

    /// Collaborator unreachable during dry run
    #[error("{component} unreachable: {reason}")]
    Unreachable { component: String, reason: String },

    /// I/O error outside a pipeline unit
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
