//! FluidSynth renderer
//!
//! Runs `fluidsynth -ni -F <wav> -r <rate> -T wav <soundfont> <mid>`. The
//! MIDI buffer is written to a scratch file first since FluidSynth only
//! reads from disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{process, Renderer};
use crate::config::RenderConfig;
use crate::error::TransformError;
use crate::services::TempFileManager;

pub struct FluidSynthRenderer {
    binary: PathBuf,
    soundfont: PathBuf,
    sample_rate: u32,
    timeout: Duration,
    temp_files: TempFileManager,
}

impl FluidSynthRenderer {
    pub fn new(config: &RenderConfig, timeout: Duration, temp_files: TempFileManager) -> Self {
        Self {
            binary: config.fluidsynth_path.clone(),
            soundfont: config.soundfont.clone(),
            sample_rate: config.sample_rate,
            timeout,
            temp_files,
        }
    }

    fn arguments(&self, midi: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "-ni".into(),
            "-F".into(),
            output.as_os_str().to_owned(),
            "-r".into(),
            self.sample_rate.to_string().into(),
            "-T".into(),
            "wav".into(),
            self.soundfont.as_os_str().to_owned(),
            midi.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl Renderer for FluidSynthRenderer {
    fn name(&self) -> &str {
        "fluidsynth"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        process::probe_version(&self.binary, "--version").await
    }

    async fn render(&self, midi: &[u8], output: &Path) -> Result<(), TransformError> {
        let midi_path = self.temp_files.allocate("midi", "mid")?;

        let result = async {
            tokio::fs::write(&midi_path, midi).await?;
            process::run(&self.binary, self.arguments(&midi_path, output), self.timeout).await?;

            let written = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
            if written == 0 {
                return Err(TransformError::InvalidOutput(format!(
                    "fluidsynth produced no audio at {}",
                    output.display()
                )));
            }
            debug!(output = %output.display(), bytes = written, "Rendered MIDI");
            Ok::<(), TransformError>(())
        }
        .await;

        self.temp_files.release(&midi_path);
        result
    }
}
