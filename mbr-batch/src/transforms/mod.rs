//! External conversion stages
//!
//! Each stage is a black-box transform behind a narrow async trait. The
//! bundled implementations shell out to FluidSynth and ffmpeg; tests supply
//! in-process fakes.

pub mod fluidsynth;
pub mod loudnorm;
pub mod mp3_encoder;
pub mod process;

pub use fluidsynth::FluidSynthRenderer;
pub use loudnorm::LoudnormNormalizer;
pub use mp3_encoder::Mp3Encoder;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::models::{LoudnessMeasurement, ResolvedTags};

/// Loudness the normalizer aims for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessTarget {
    pub integrated_lufs: f64,
    pub true_peak_db: f64,
    pub loudness_range: f64,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated_lufs: -16.0,
            true_peak_db: -1.5,
            loudness_range: 11.0,
        }
    }
}

/// What the encoder actually produced
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedArtifact {
    /// Tags read back from the written file
    pub tags: ResolvedTags,
    pub duration_seconds: f64,
}

/// Renders a canonical MIDI buffer to PCM audio
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Verify the transform is installed; returns its version line
    async fn probe(&self) -> Result<String, TransformError>;

    async fn render(&self, midi: &[u8], output: &Path) -> Result<(), TransformError>;
}

/// Measures and normalizes loudness
#[async_trait]
pub trait Normalizer: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self) -> Result<String, TransformError>;

    /// Returns the loudness measured before normalization
    ///
    /// Silent input fails with `TransformError::SilentInput`.
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, TransformError>;
}

/// Encodes to the lossy output format and embeds tags
#[async_trait]
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self) -> Result<String, TransformError>;

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        tags: &ResolvedTags,
    ) -> Result<EncodedArtifact, TransformError>;
}

/// The three stages, in pipeline order
#[derive(Clone)]
pub struct Transforms {
    pub renderer: Arc<dyn Renderer>,
    pub normalizer: Arc<dyn Normalizer>,
    pub encoder: Arc<dyn Encoder>,
}

impl Transforms {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        normalizer: Arc<dyn Normalizer>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        Self {
            renderer,
            normalizer,
            encoder,
        }
    }

    /// Probe every stage, returning `(name, result)` pairs in order
    pub async fn probe_all(&self) -> Vec<(String, Result<String, TransformError>)> {
        vec![
            (self.renderer.name().to_string(), self.renderer.probe().await),
            (self.normalizer.name().to_string(), self.normalizer.probe().await),
            (self.encoder.name().to_string(), self.encoder.probe().await),
        ]
    }
}
