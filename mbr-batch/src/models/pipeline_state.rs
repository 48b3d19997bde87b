//! Per-record pipeline state machine
//!
//! Extracting → Rendering → Normalizing → Encoding → Committing → Completed
//!
//! `Failed` absorbs an error from any of the first five states; a retry
//! re-enters `Extracting` with fresh scratch files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline state for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Payload normalization into the canonical byte buffer
    Extracting,
    /// MIDI → PCM WAV
    Rendering,
    /// Two-pass loudness normalization
    Normalizing,
    /// Lossy encode plus tag embedding
    Encoding,
    /// Output path resolution and atomic commit
    Committing,
    /// Terminal success
    Completed,
    /// Terminal failure for the attempt
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Rendering => "rendering",
            Stage::Normalizing => "normalizing",
            Stage::Encoding => "encoding",
            Stage::Committing => "committing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// Next state on success, `None` for the terminal states
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Extracting => Some(Stage::Rendering),
            Stage::Rendering => Some(Stage::Normalizing),
            Stage::Normalizing => Some(Stage::Encoding),
            Stage::Encoding => Some(Stage::Committing),
            Stage::Committing => Some(Stage::Completed),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
