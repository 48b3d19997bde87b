//! Batch configuration
//!
//! Resolution priority (highest first):
//! 1. Command-line flag
//! 2. Environment variable (`MBR_*`, bound through clap)
//! 3. TOML config file
//! 4. Compiled default
//!
//! The binary applies tiers 1 and 2 through `ConfigOverrides` on top of the
//! file-or-default `BatchConfig`, then calls `validate` before anything
//! touches the store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mbr_common::config::{default_data_dir, load_toml, resolve_config_path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::BatchError;
use crate::store::{RecordFilter, StatusExclusion};
use crate::transforms::LoudnessTarget;
use crate::workflow::RetryPolicy;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MBR_CONFIG";

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2000;
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_STALE_PROCESSING_MINUTES: u64 = 60;
pub const DEFAULT_TRANSFORM_TIMEOUT_SECS: u64 = 600;

/// FluidSynth render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fluidsynth_path: PathBuf,
    pub soundfont: PathBuf,
    pub sample_rate: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fluidsynth_path: PathBuf::from("fluidsynth"),
            soundfont: PathBuf::from("/usr/share/sounds/sf2/FluidR3_GM.sf2"),
            sample_rate: 44_100,
        }
    }
}

/// ffmpeg loudnorm settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub ffmpeg_path: PathBuf,
    pub integrated_lufs: f64,
    pub true_peak_db: f64,
    pub loudness_range: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        let target = LoudnessTarget::default();
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            integrated_lufs: target.integrated_lufs,
            true_peak_db: target.true_peak_db,
            loudness_range: target.loudness_range,
        }
    }
}

impl NormalizeConfig {
    pub fn target(&self) -> LoudnessTarget {
        LoudnessTarget {
            integrated_lufs: self.integrated_lufs,
            true_peak_db: self.true_peak_db,
            loudness_range: self.loudness_range,
        }
    }
}

/// ffmpeg libmp3lame settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub ffmpeg_path: PathBuf,
    /// Bitrate in kbit/s
    pub bitrate: u32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            bitrate: 192,
        }
    }
}

/// Complete batch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub database_path: PathBuf,
    pub output_root: PathBuf,
    pub work_dir: PathBuf,
    pub concurrency: usize,
    /// Store connection pool size; defaults to `concurrency + 2`
    pub pool_size: Option<u32>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub progress_interval_secs: u64,
    pub skip_failed: bool,
    /// Age after which a `processing` record counts as abandoned; 0 makes
    /// every `processing` record eligible
    pub stale_processing_minutes: u64,
    pub output_extension: String,
    pub transform_timeout_secs: u64,
    pub render: RenderConfig,
    pub normalize: NormalizeConfig,
    pub encode: EncodeConfig,
    /// Opaque record predicate: document field → scalar
    pub filter: Map<String, Value>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("records.db"),
            output_root: data_dir.join("output"),
            work_dir: std::env::temp_dir().join("mbr-work"),
            concurrency: DEFAULT_CONCURRENCY,
            pool_size: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
            skip_failed: false,
            stale_processing_minutes: DEFAULT_STALE_PROCESSING_MINUTES,
            output_extension: "mp3".to_string(),
            transform_timeout_secs: DEFAULT_TRANSFORM_TIMEOUT_SECS,
            render: RenderConfig::default(),
            normalize: NormalizeConfig::default(),
            encode: EncodeConfig::default(),
            filter: Map::new(),
        }
    }
}

/// Values supplied on the command line or through `MBR_*` variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub pool_size: Option<u32>,
    pub max_retries: Option<u32>,
    pub skip_failed: bool,
    pub soundfont: Option<PathBuf>,
    pub fluidsynth_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    /// Extra `field = value` predicate terms, merged over the file's table
    pub filter_terms: Vec<(String, Value)>,
}

impl BatchConfig {
    /// Load the TOML file (if any) or fall back to defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self, BatchError> {
        let path = resolve_config_path(config_path, CONFIG_ENV_VAR)
            .map_err(|e| BatchError::Configuration(e.to_string()))?;

        match path {
            Some(path) => {
                info!("Loading config from {}", path.display());
                load_toml(&path).map_err(|e| BatchError::Configuration(e.to_string()))
            }
            None => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(path) = overrides.database_path {
            self.database_path = path;
        }
        if let Some(path) = overrides.output_root {
            self.output_root = path;
        }
        if let Some(path) = overrides.work_dir {
            self.work_dir = path;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(pool_size) = overrides.pool_size {
            self.pool_size = Some(pool_size);
        }
        if let Some(max_retries) = overrides.max_retries {
            self.max_retries = max_retries;
        }
        if overrides.skip_failed {
            self.skip_failed = true;
        }
        if let Some(path) = overrides.soundfont {
            self.render.soundfont = path;
        }
        if let Some(path) = overrides.fluidsynth_path {
            self.render.fluidsynth_path = path;
        }
        if let Some(path) = overrides.ffmpeg_path {
            self.normalize.ffmpeg_path = path.clone();
            self.encode.ffmpeg_path = path;
        }
        for (field, value) in overrides.filter_terms {
            self.filter.insert(field, value);
        }
        self
    }

    /// Check invariants that must hold before any record is touched
    ///
    /// `require_soundfont` is false for modes that never render
    /// (`stats`, `import`, `reset`).
    pub fn validate(&self, require_soundfont: bool) -> Result<(), BatchError> {
        let fail = |msg: String| Err(BatchError::Configuration(msg));

        if self.concurrency == 0 {
            return fail("concurrency must be at least 1".to_string());
        }
        let pool_size = self.effective_pool_size();
        if (pool_size as usize) < self.concurrency {
            return fail(format!(
                "pool_size ({}) must be at least concurrency ({})",
                pool_size, self.concurrency
            ));
        }

        for (name, path) in [
            ("database_path", &self.database_path),
            ("output_root", &self.output_root),
            ("work_dir", &self.work_dir),
            ("render.fluidsynth_path", &self.render.fluidsynth_path),
            ("normalize.ffmpeg_path", &self.normalize.ffmpeg_path),
            ("encode.ffmpeg_path", &self.encode.ffmpeg_path),
        ] {
            if path.as_os_str().is_empty() {
                return fail(format!("{} must not be empty", name));
            }
        }

        let extension = self.output_extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return fail(format!("invalid output_extension '{}'", self.output_extension));
        }

        if require_soundfont && !self.render.soundfont.is_file() {
            return fail(format!(
                "soundfont not found: {}",
                self.render.soundfont.display()
            ));
        }
        if self.render.sample_rate == 0 {
            return fail("render.sample_rate must be positive".to_string());
        }

        let target = self.normalize.target();
        if !(target.integrated_lufs.is_finite()
            && target.true_peak_db.is_finite()
            && target.loudness_range.is_finite())
        {
            return fail("loudness target values must be finite".to_string());
        }
        if !(-70.0..=-5.0).contains(&target.integrated_lufs) {
            return fail(format!(
                "normalize.integrated_lufs {} outside -70..-5",
                target.integrated_lufs
            ));
        }
        if self.encode.bitrate == 0 {
            return fail("encode.bitrate must be positive".to_string());
        }

        self.record_filter()
            .validate()
            .or_else(|e| fail(e))
    }

    pub fn effective_pool_size(&self) -> u32 {
        self.pool_size
            .unwrap_or_else(|| u32::try_from(self.concurrency + 2).unwrap_or(u32::MAX))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs.max(1))
    }

    /// Filter predicate without the status exclusion
    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter::new(self.filter.clone())
    }

    pub fn status_exclusion(&self) -> StatusExclusion {
        StatusExclusion {
            exclude_failed: self.skip_failed,
            stale_processing_after: match self.stale_processing_minutes {
                0 => None,
                minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
            },
        }
    }
}
