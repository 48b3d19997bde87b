//! Batch context
//!
//! Owns the store handle, configuration, event bus and transforms for the
//! lifetime of one process. Everything the core needs is passed down from
//! here; there are no process-wide singletons.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::models::ProcessingStats;
use crate::services::{AtomicWriter, TempFileManager};
use crate::store::{RecordFilter, RecordStore, SqliteRecordStore};
use crate::transforms::{FluidSynthRenderer, LoudnormNormalizer, Mp3Encoder, Transforms};
use crate::workflow::{BatchOptions, BatchOrchestrator, PipelineSettings, StagePipeline};
use mbr_common::EventBus;

/// Result of one reachability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub component: String,
    /// Version or location on success, failure reason otherwise
    pub detail: Result<String, String>,
}

/// Outcome of a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    pub checks: Vec<CheckResult>,
    /// Records a real run would consider
    pub matching: u64,
}

impl DryRunReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.detail.is_ok())
    }

    /// First failed check as a batch error
    pub fn into_result(self) -> Result<Self, BatchError> {
        if let Some(failed) = self.checks.iter().find(|c| c.detail.is_err()) {
            return Err(BatchError::Unreachable {
                component: failed.component.clone(),
                reason: failed.detail.clone().err().unwrap_or_default(),
            });
        }
        Ok(self)
    }

    fn push(&mut self, component: impl Into<String>, detail: Result<String, String>) {
        self.checks.push(CheckResult {
            component: component.into(),
            detail,
        });
    }
}

pub struct BatchContext {
    config: BatchConfig,
    store: Arc<SqliteRecordStore>,
    events: EventBus,
    temp_files: TempFileManager,
    transforms: Transforms,
    writer: AtomicWriter,
    external_transforms: bool,
}

impl BatchContext {
    /// Validate `config` and open the store
    pub async fn open(config: BatchConfig) -> Result<Self, BatchError> {
        config.validate(false)?;

        let store = SqliteRecordStore::open(&config.database_path, config.effective_pool_size()).await?;
        info!(
            database = %config.database_path.display(),
            pool_size = config.effective_pool_size(),
            "Record store opened"
        );

        let temp_files = TempFileManager::new(&config.work_dir);
        let timeout = config.transform_timeout();
        let transforms = Transforms::new(
            Arc::new(FluidSynthRenderer::new(&config.render, timeout, temp_files.clone())),
            Arc::new(LoudnormNormalizer::new(
                &config.normalize,
                config.render.sample_rate,
                timeout,
            )),
            Arc::new(Mp3Encoder::new(&config.encode, timeout)),
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            events: EventBus::default(),
            temp_files,
            transforms,
            writer: AtomicWriter::default(),
            external_transforms: true,
        })
    }

    /// Replace the external transforms (the soundfont check no longer applies)
    pub fn with_transforms(mut self, transforms: Transforms) -> Self {
        self.transforms = transforms;
        self.external_transforms = false;
        self
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteRecordStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn temp_files(&self) -> &TempFileManager {
        &self.temp_files
    }

    /// Options for a run using the configured filter and concurrency
    pub fn default_options(&self, limit: Option<u64>) -> BatchOptions {
        BatchOptions {
            limit,
            filter: self.config.record_filter(),
            concurrency: self.config.concurrency,
        }
    }

    /// Process the eligible records
    pub async fn run_batch(
        &self,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> Result<ProcessingStats, BatchError> {
        self.config.validate(self.external_transforms)?;
        self.check_concurrency(options.concurrency)?;
        options
            .filter
            .validate()
            .map_err(BatchError::Configuration)?;

        let store: Arc<dyn RecordStore> = self.store.clone();
        let pipeline = StagePipeline::new(
            Arc::clone(&store),
            self.transforms.clone(),
            self.temp_files.clone(),
            self.writer.clone(),
            PipelineSettings {
                output_root: self.config.output_root.clone(),
                output_extension: self.config.output_extension.clone(),
                target: self.config.normalize.target(),
                retry: self.config.retry_policy(),
            },
            self.events.clone(),
        );
        let orchestrator = BatchOrchestrator::new(
            store,
            Arc::new(pipeline),
            self.temp_files.clone(),
            self.config.status_exclusion(),
            self.config.progress_interval(),
            self.events.clone(),
        );

        orchestrator.run(options, cancel).await
    }

    /// Validate configuration and collaborator reachability without
    /// opening the cursor
    pub async fn dry_run(&self, filter: &RecordFilter) -> Result<DryRunReport, BatchError> {
        self.config.validate(self.external_transforms)?;
        filter.validate().map_err(BatchError::Configuration)?;

        let mut report = DryRunReport::default();

        match self.store.ping().await {
            Ok(()) => report.push("store", Ok(self.config.database_path.display().to_string())),
            Err(e) => report.push("store", Err(e.to_string())),
        }

        for (name, result) in self.transforms.probe_all().await {
            report.push(name, result.map_err(|e| e.to_string()));
        }

        report.push("output_root", check_writable(&self.config.output_root).await);
        report.push("work_dir", check_writable(&self.config.work_dir).await);

        if report.checks[0].detail.is_ok() {
            report.matching = self.stats_only(filter).await?;
        }

        for check in &report.checks {
            match &check.detail {
                Ok(detail) => info!(component = %check.component, detail = %detail, "Dry run check passed"),
                Err(reason) => warn!(component = %check.component, reason = %reason, "Dry run check failed"),
            }
        }
        Ok(report)
    }

    /// Count the records a run with `filter` would consider
    pub async fn stats_only(&self, filter: &RecordFilter) -> Result<u64, BatchError> {
        filter.validate().map_err(BatchError::Configuration)?;
        let filter = filter.with_exclusion(self.config.status_exclusion());
        Ok(self.store.count_matching(&filter).await?)
    }

    /// Release the store; leftover scratch files are swept
    pub async fn close(self) {
        self.temp_files.release_all();
        self.store.close().await;
        info!("Batch context closed");
    }

    fn check_concurrency(&self, concurrency: usize) -> Result<(), BatchError> {
        if concurrency == 0 {
            return Err(BatchError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        let pool_size = self.config.effective_pool_size() as usize;
        if concurrency > pool_size {
            return Err(BatchError::Configuration(format!(
                "concurrency ({}) exceeds store pool size ({})",
                concurrency, pool_size
            )));
        }
        Ok(())
    }
}

/// Create `dir` if needed and prove a file can be written there
async fn check_writable(dir: &Path) -> Result<String, String> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;

    let probe = dir.join(format!(".mbr-write-probe-{}", Uuid::new_v4().simple()));
    tokio::fs::write(&probe, b"probe")
        .await
        .map_err(|e| format!("cannot write in {}: {}", dir.display(), e))?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }
    Ok(dir.display().to_string())
}
