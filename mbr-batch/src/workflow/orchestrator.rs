//! Batch orchestrator
//!
//! Consumes the record cursor and fans records out to at most
//! `concurrency` pipeline units. A semaphore permit is acquired *before*
//! the next record is pulled, so the cursor is never read ahead of free
//! capacity and the ceiling is structural. Statistics are owned by the loop
//! and updated as units join.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use mbr_common::{BatchEvent, EventBus};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::pipeline::{panic_message, StagePipeline};
use crate::error::{BatchError, PipelineError};
use crate::models::{CompletionRecord, ProcessingStats, Record};
use crate::services::TempFileManager;
use crate::store::{RecordFilter, RecordStore, StatusExclusion};

type UnitResult = (String, Result<CompletionRecord, PipelineError>);

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum number of records pulled from the cursor
    pub limit: Option<u64>,
    /// Predicate passed to the store; the status exclusion is appended here
    pub filter: RecordFilter,
    /// Maximum simultaneous pipeline units
    pub concurrency: usize,
}

/// Live unit counters shared with spawned units
#[derive(Default)]
struct SlotGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct BatchOrchestrator {
    store: Arc<dyn RecordStore>,
    pipeline: Arc<StagePipeline>,
    temp_files: TempFileManager,
    exclusion: StatusExclusion,
    progress_interval: Duration,
    events: EventBus,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        pipeline: Arc<StagePipeline>,
        temp_files: TempFileManager,
        exclusion: StatusExclusion,
        progress_interval: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            pipeline,
            temp_files,
            exclusion,
            progress_interval,
            events,
        }
    }

    /// Process every eligible record, returning the run's statistics
    ///
    /// Per-record failures are counted, not raised. Cursor or store errors
    /// abort the run. Cancelling `cancel` stops admission, aborts in-flight
    /// units and returns the stats flagged `interrupted`. Scratch files are
    /// swept on every exit path.
    pub async fn run(
        &self,
        options: BatchOptions,
        cancel: CancellationToken,
    ) -> Result<ProcessingStats, BatchError> {
        if options.concurrency == 0 {
            return Err(BatchError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let _cleanup = self.temp_files.guard();

        let filter = options.filter.with_exclusion(self.exclusion.clone());
        let matching = self.store.count_matching(&filter).await?;
        let total = options.limit.map_or(matching, |limit| limit.min(matching));

        let mut stats = ProcessingStats::new(total);
        info!(
            total,
            matching,
            limit = ?options.limit,
            concurrency = options.concurrency,
            "Starting batch run"
        );
        self.events.emit_lossy(BatchEvent::RunStarted {
            total,
            concurrency: options.concurrency,
            timestamp: Utc::now(),
        });

        let gauge = Arc::new(SlotGauge::default());
        let outcome = if options.limit == Some(0) {
            Ok(())
        } else {
            self.consume(&options, &filter, &mut stats, &gauge, &cancel).await
        };
        stats.peak_concurrency = gauge.peak();

        self.events.emit_lossy(BatchEvent::RunFinished {
            processed: stats.processed,
            successful: stats.successful,
            failed: stats.failed,
            interrupted: stats.interrupted,
            timestamp: Utc::now(),
        });

        match outcome {
            Ok(()) => {
                info!("Batch run finished: {}", stats.display_string());
                Ok(stats)
            }
            Err(e) => {
                error!(error = %e, "Batch run aborted: {}", stats.display_string());
                Err(e)
            }
        }
    }

    async fn consume(
        &self,
        options: &BatchOptions,
        filter: &RecordFilter,
        stats: &mut ProcessingStats,
        gauge: &Arc<SlotGauge>,
        cancel: &CancellationToken,
    ) -> Result<(), BatchError> {
        let cursor = self.store.stream_matching(filter).await?;
        let mut cursor = match options.limit {
            Some(limit) => cursor
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .boxed(),
            None => cursor,
        };

        let slots = Arc::new(Semaphore::new(options.concurrency));
        let mut units: JoinSet<UnitResult> = JoinSet::new();
        let mut cursor_done = false;

        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let result = loop {
            if cursor_done && units.is_empty() {
                break Ok(());
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(in_flight = units.len(), "Interrupt received, stopping batch");
                    stats.interrupted = true;
                    break Ok(());
                }

                Some(joined) = units.join_next(), if !units.is_empty() => {
                    absorb(stats, joined);
                }

                _ = ticker.tick() => {
                    self.report_progress(stats, gauge.active());
                }

                permit = Arc::clone(&slots).acquire_owned(), if !cursor_done => {
                    let Ok(permit) = permit else {
                        cursor_done = true;
                        continue;
                    };
                    match cursor.next().await {
                        Some(Ok(record)) => self.admit(&mut units, record, permit, gauge),
                        Some(Err(e)) => break Err(BatchError::Store(e)),
                        None => cursor_done = true,
                    }
                }
            }
        };

        if !units.is_empty() {
            units.abort_all();
            while let Some(joined) = units.join_next().await {
                absorb(stats, joined);
            }
        }
        self.report_progress(stats, gauge.active());
        result
    }

    fn admit(
        &self,
        units: &mut JoinSet<UnitResult>,
        record: Record,
        permit: OwnedSemaphorePermit,
        gauge: &Arc<SlotGauge>,
    ) {
        self.events.emit_lossy(BatchEvent::RecordStarted {
            record_id: record.id.clone(),
            timestamp: Utc::now(),
        });

        let pipeline = Arc::clone(&self.pipeline);
        let gauge = Arc::clone(gauge);
        let span = info_span!("record", record_id = %record.id, hash = %record.short_hash());

        gauge.enter();
        units.spawn(
            async move {
                let result = AssertUnwindSafe(pipeline.process(&record))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(PipelineError::Internal(panic_message(panic))));
                gauge.leave();
                drop(permit);
                (record.id, result)
            }
            .instrument(span),
        );
    }

    fn report_progress(&self, stats: &ProcessingStats, in_flight: usize) {
        info!(in_flight, "Progress: {}", stats.display_string());
        self.events.emit_lossy(stats.progress_event(in_flight));
    }
}

fn absorb(stats: &mut ProcessingStats, joined: Result<UnitResult, JoinError>) {
    match joined {
        Ok((_, Ok(_))) => stats.record_success(),
        Ok((record_id, Err(e))) => stats.record_failure(record_id, e.to_string()),
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            error!(error = %e, "Pipeline unit terminated abnormally");
            stats.record_failure("<unknown>", e.to_string());
        }
    }
}
