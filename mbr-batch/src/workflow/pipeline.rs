//! Per-record stage pipeline
//!
//! One attempt runs `Extracting → Rendering → Normalizing → Encoding →
//! Committing`. Every intermediate file comes from an attempt-scoped
//! `TempScope`, so whichever stage fails, the attempt's scratch files are
//! gone once it returns. The retry loop wraps whole attempts; `processing`
//! is persisted on every attempt that gets past extraction, `completed` on
//! success and `failed` only after the last attempt.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use mbr_common::{BatchEvent, EventBus};
use tracing::{debug, error, info, warn};

use crate::error::{CommitError, PipelineError};
use crate::models::{CompletionRecord, Record, Stage, StatusUpdate};
use crate::services::{
    disambiguate, extract_payload, resolve_metadata, AtomicWriter, OutputPathResolver,
    TempFileManager,
};
use crate::store::RecordStore;
use crate::transforms::{LoudnessTarget, Transforms};
use crate::workflow::RetryPolicy;

/// Pipeline tuning taken from the batch configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_root: PathBuf,
    pub output_extension: String,
    pub target: LoudnessTarget,
    pub retry: RetryPolicy,
}

pub struct StagePipeline {
    store: Arc<dyn RecordStore>,
    transforms: Transforms,
    temp_files: TempFileManager,
    paths: OutputPathResolver,
    writer: AtomicWriter,
    target: LoudnessTarget,
    retry: RetryPolicy,
    events: EventBus,
}

impl StagePipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transforms: Transforms,
        temp_files: TempFileManager,
        writer: AtomicWriter,
        settings: PipelineSettings,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            transforms,
            temp_files,
            paths: OutputPathResolver::new(settings.output_root, settings.output_extension),
            writer,
            target: settings.target,
            retry: settings.retry,
            events,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run one record to a terminal status
    ///
    /// Returns the last attempt's error once retries are exhausted.
    pub async fn process(&self, record: &Record) -> Result<CompletionRecord, PipelineError> {
        let mut attempt = 1;
        loop {
            let result = AssertUnwindSafe(self.attempt(record, attempt))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(panic))));

            match result {
                Ok(completion) => return self.finish_completed(record, attempt, completion).await,
                Err(err) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        record_id = %record.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Pipeline attempt failed, retrying"
                    );
                    self.events.emit_lossy(BatchEvent::RecordRetrying {
                        record_id: record.id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(self.finish_failed(record, attempt, err).await),
            }
        }
    }

    async fn attempt(&self, record: &Record, attempt: u32) -> Result<CompletionRecord, PipelineError> {
        let mut scratch = self.temp_files.scope();
        let tag = record.short_hash();

        self.enter(record, Stage::Extracting, attempt);
        let payload = extract_payload(record)?;

        self.store
            .update_status(&record.id, &StatusUpdate::Processing { attempt })
            .await?;

        self.enter(record, Stage::Rendering, attempt);
        let rendered = scratch.allocate(tag, "wav").map_err(PipelineError::TempFile)?;
        self.transforms
            .renderer
            .render(payload.as_bytes(), &rendered)
            .await
            .map_err(|e| PipelineError::stage(Stage::Rendering, e))?;

        self.enter(record, Stage::Normalizing, attempt);
        let normalized = scratch.allocate(tag, "wav").map_err(PipelineError::TempFile)?;
        let loudness = self
            .transforms
            .normalizer
            .normalize(&rendered, &normalized, &self.target)
            .await
            .map_err(|e| PipelineError::stage(Stage::Normalizing, e))?;
        scratch.release(&rendered);

        self.enter(record, Stage::Encoding, attempt);
        let metadata = resolve_metadata(&record.metadata);
        let encoded = scratch
            .allocate(tag, self.paths.extension())
            .map_err(PipelineError::TempFile)?;
        let artifact = self
            .transforms
            .encoder
            .encode(&normalized, &encoded, &metadata.to_tags())
            .await
            .map_err(|e| PipelineError::stage(Stage::Encoding, e))?;
        scratch.release(&normalized);

        self.enter(record, Stage::Committing, attempt);
        let primary = self.paths.resolve(&metadata);
        let outcome = match self.writer.commit(&encoded, &primary).await {
            Err(CommitError::TargetExists { .. }) => {
                // The alternate is derived from this record's own hash
                let key = record.content_hash.as_deref().unwrap_or(record.id.as_str());
                let alternate = disambiguate(&primary, key);
                debug!(
                    record_id = %record.id,
                    primary = %primary.display(),
                    alternate = %alternate.display(),
                    "Output path taken, disambiguating"
                );
                self.writer.replace(&encoded, &alternate).await?
            }
            placed => placed?,
        };

        Ok(CompletionRecord {
            output_path: outcome.path.display().to_string(),
            duration_seconds: artifact.duration_seconds,
            loudness,
            tags: artifact.tags,
            bytes_written: outcome.bytes,
        })
    }

    async fn finish_completed(
        &self,
        record: &Record,
        attempts: u32,
        completion: CompletionRecord,
    ) -> Result<CompletionRecord, PipelineError> {
        self.store
            .update_status(
                &record.id,
                &StatusUpdate::Completed {
                    attempts,
                    completion: completion.clone(),
                },
            )
            .await?;

        info!(
            record_id = %record.id,
            output = %completion.output_path,
            attempts,
            "Record completed"
        );
        self.events.emit_lossy(BatchEvent::RecordCompleted {
            record_id: record.id.clone(),
            output_path: completion.output_path.clone(),
            attempts,
        });
        Ok(completion)
    }

    async fn finish_failed(&self, record: &Record, attempts: u32, err: PipelineError) -> PipelineError {
        let message = err.to_string();
        let update = StatusUpdate::Failed {
            attempts,
            error: message.clone(),
        };
        if let Err(store_err) = self.store.update_status(&record.id, &update).await {
            error!(
                record_id = %record.id,
                error = %store_err,
                "Failed to persist failed status"
            );
        }

        warn!(
            record_id = %record.id,
            attempts,
            stage = err.failed_stage().map(|s| s.as_str()).unwrap_or("-"),
            error = %message,
            "Record failed"
        );
        self.events.emit_lossy(BatchEvent::RecordFailed {
            record_id: record.id.clone(),
            error: message,
            attempts,
        });
        err
    }

    fn enter(&self, record: &Record, stage: Stage, attempt: u32) {
        debug!(record_id = %record.id, stage = stage.as_str(), attempt, "Entering stage");
        self.events.emit_lossy(BatchEvent::StageEntered {
            record_id: record.id.clone(),
            stage: stage.as_str().to_string(),
            attempt,
        });
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("pipeline panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("pipeline panicked: {}", s)
    } else {
        "pipeline panicked".to_string()
    }
}
