//! Processing status persisted back to the record's store entry
//!
//! Transitions:
//! - `unset | failed → processing` when an attempt reaches rendering
//! - `processing → completed` after a successful commit
//! - `processing → failed` after retries are exhausted
//!
//! `completed` and `failed` stay terminal until an operator resets them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Record processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Unset,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Column value; `Unset` is stored as NULL
    pub fn as_db_value(&self) -> Option<&'static str> {
        match self {
            ProcessingStatus::Unset => None,
            ProcessingStatus::Processing => Some("processing"),
            ProcessingStatus::Completed => Some("completed"),
            ProcessingStatus::Failed => Some("failed"),
        }
    }

    pub fn from_db_value(value: Option<&str>) -> Result<Self, String> {
        match value {
            None => Ok(ProcessingStatus::Unset),
            Some(s) => s.parse(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_value().unwrap_or("unset"))
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unset" => Ok(ProcessingStatus::Unset),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status '{}'", other)),
        }
    }
}

/// Loudness measured by the first normalize pass (before gain is applied)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    /// Integrated loudness (LUFS)
    pub integrated_lufs: f64,
    /// True peak (dBTP)
    pub true_peak_db: f64,
    /// Loudness range (LU)
    pub loudness_range: f64,
    /// Gating threshold (LUFS)
    pub threshold_lufs: f64,
}

/// Tags as actually written into the output artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTags {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub genre: Option<String>,
}

/// Fields persisted with the `completed` status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub output_path: String,
    pub duration_seconds: f64,
    pub loudness: LoudnessMeasurement,
    pub tags: ResolvedTags,
    pub bytes_written: u64,
}

/// Status update sent to the store
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// Attempt is past extraction and about to render
    Processing { attempt: u32 },
    /// Output committed
    Completed {
        attempts: u32,
        completion: CompletionRecord,
    },
    /// Retries exhausted
    Failed { attempts: u32, error: String },
}

impl StatusUpdate {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            StatusUpdate::Processing { .. } => ProcessingStatus::Processing,
            StatusUpdate::Completed { .. } => ProcessingStatus::Completed,
            StatusUpdate::Failed { .. } => ProcessingStatus::Failed,
        }
    }
}
