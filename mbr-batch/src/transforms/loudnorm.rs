//! Two-pass ffmpeg loudnorm normalizer
//!
//! Pass 1 measures with `print_format=json`; pass 2 applies the filter with
//! the measured values and `linear=true`, which keeps dynamics intact when
//! the target is reachable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{process, LoudnessTarget, Normalizer};
use crate::config::NormalizeConfig;
use crate::error::TransformError;
use crate::models::LoudnessMeasurement;

/// Integrated loudness below this is treated as silence
pub const SILENCE_FLOOR_LUFS: f64 = -70.0;

/// Pass-1 report as printed by loudnorm (numbers arrive as strings)
#[derive(Debug, Clone, Deserialize)]
struct RawReport {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

/// Parsed pass-1 measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnormReport {
    pub input_i: f64,
    pub input_tp: f64,
    pub input_lra: f64,
    pub input_thresh: f64,
    pub target_offset: f64,
}

impl LoudnormReport {
    pub fn measurement(&self) -> LoudnessMeasurement {
        LoudnessMeasurement {
            integrated_lufs: self.input_i,
            true_peak_db: self.input_tp,
            loudness_range: self.input_lra,
            threshold_lufs: self.input_thresh,
        }
    }

    /// Fail with `SilentInput` when there is no usable signal
    pub fn ensure_audible(&self) -> Result<(), TransformError> {
        if self.input_i.is_nan() || self.input_i < SILENCE_FLOOR_LUFS {
            return Err(TransformError::SilentInput {
                measured_lufs: self.input_i,
            });
        }
        Ok(())
    }
}

/// Extract the JSON block loudnorm prints at the end of stderr
pub fn parse_report(stderr: &str) -> Result<LoudnormReport, TransformError> {
    let start = stderr
        .rfind("\"input_i\"")
        .and_then(|i| stderr[..i].rfind('{'))
        .ok_or_else(|| TransformError::InvalidOutput("no loudnorm report in ffmpeg output".to_string()))?;
    let end = stderr[start..]
        .find('}')
        .map(|i| start + i + 1)
        .ok_or_else(|| TransformError::InvalidOutput("unterminated loudnorm report".to_string()))?;

    let raw: RawReport = serde_json::from_str(&stderr[start..end])
        .map_err(|e| TransformError::InvalidOutput(format!("loudnorm report: {}", e)))?;

    Ok(LoudnormReport {
        input_i: parse_value("input_i", &raw.input_i)?,
        input_tp: parse_value("input_tp", &raw.input_tp)?,
        input_lra: parse_value("input_lra", &raw.input_lra)?,
        input_thresh: parse_value("input_thresh", &raw.input_thresh)?,
        target_offset: parse_value("target_offset", &raw.target_offset)?,
    })
}

fn parse_value(field: &str, raw: &str) -> Result<f64, TransformError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| TransformError::InvalidOutput(format!("loudnorm {} is not a number: {}", field, raw)))
}

fn target_filter(target: &LoudnessTarget) -> String {
    format!(
        "loudnorm=I={}:TP={}:LRA={}",
        target.integrated_lufs, target.true_peak_db, target.loudness_range
    )
}

fn measure_filter(target: &LoudnessTarget) -> String {
    format!("{}:print_format=json", target_filter(target))
}

fn apply_filter(target: &LoudnessTarget, report: &LoudnormReport) -> String {
    format!(
        "{}:measured_I={}:measured_TP={}:measured_LRA={}:measured_thresh={}:offset={}:linear=true:print_format=summary",
        target_filter(target),
        report.input_i,
        report.input_tp,
        report.input_lra,
        report.input_thresh,
        report.target_offset
    )
}

pub struct LoudnormNormalizer {
    binary: PathBuf,
    sample_rate: u32,
    timeout: Duration,
}

impl LoudnormNormalizer {
    /// `sample_rate` is the output rate; loudnorm otherwise resamples to 192 kHz
    pub fn new(config: &NormalizeConfig, sample_rate: u32, timeout: Duration) -> Self {
        Self {
            binary: config.ffmpeg_path.clone(),
            sample_rate,
            timeout,
        }
    }

    fn measure_args(&self, input: &Path, target: &LoudnessTarget) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-af".into(),
            measure_filter(target).into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]
    }

    fn apply_args(
        &self,
        input: &Path,
        output: &Path,
        target: &LoudnessTarget,
        report: &LoudnormReport,
    ) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-af".into(),
            apply_filter(target, report).into(),
            "-ar".into(),
            self.sample_rate.to_string().into(),
            output.as_os_str().to_owned(),
        ]
    }
}

#[async_trait]
impl Normalizer for LoudnormNormalizer {
    fn name(&self) -> &str {
        "ffmpeg-loudnorm"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        process::probe_version(&self.binary, "-version").await
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, TransformError> {
        let measured = process::run(&self.binary, self.measure_args(input, target), self.timeout).await?;
        let report = parse_report(&measured.stderr)?;
        report.ensure_audible()?;

        debug!(
            input = %input.display(),
            input_i = report.input_i,
            input_tp = report.input_tp,
            "Measured loudness"
        );

        process::run(
            &self.binary,
            self.apply_args(input, output, target, &report),
            self.timeout,
        )
        .await?;

        Ok(report.measurement())
    }
}
