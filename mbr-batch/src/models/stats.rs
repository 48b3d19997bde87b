//! Aggregate statistics for one orchestrator run
//!
//! Owned by the orchestrator loop; units report outcomes back to it, so no
//! locking is needed. Percent complete and throughput are derived on demand.

use chrono::{DateTime, Utc};
use mbr_common::BatchEvent;
use serde::Serialize;
use std::time::{Duration, Instant};

/// A record that ended in `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub record_id: String,
    pub error: String,
}

/// Run statistics
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStats {
    /// Candidate count (explicit limit or count of the filtered set)
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub failures: Vec<FailedRecord>,
    /// Highest number of simultaneously active pipeline units observed
    pub peak_concurrency: usize,
    /// Run stopped early on an interrupt signal
    pub interrupted: bool,
    #[serde(skip)]
    started: Instant,
}

impl ProcessingStats {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            started_at: Utc::now(),
            failures: Vec::new(),
            peak_concurrency: 0,
            interrupted: false,
            started: Instant::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self, record_id: impl Into<String>, error: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.failures.push(FailedRecord {
            record_id: record_id.into(),
            error: error.into(),
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Percentage of `total` processed (0.0 - 100.0)
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Records processed per minute since start
    pub fn records_per_minute(&self) -> f64 {
        Self::throughput(self.processed, self.elapsed())
    }

    fn throughput(processed: u64, elapsed: Duration) -> f64 {
        let minutes = elapsed.as_secs_f64() / 60.0;
        if minutes <= f64::EPSILON {
            return 0.0;
        }
        processed as f64 / minutes
    }

    /// Estimated time remaining, None until throughput is known
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let rate = self.records_per_minute();
        if rate <= 0.0 || self.processed >= self.total {
            return None;
        }
        let remaining = (self.total - self.processed) as f64;
        Some(Duration::from_secs_f64(remaining / rate * 60.0))
    }

    /// True when the caller should signal a non-zero exit
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Progress snapshot event
    pub fn progress_event(&self, in_flight: usize) -> BatchEvent {
        BatchEvent::Progress {
            total: self.total,
            processed: self.processed,
            successful: self.successful,
            failed: self.failed,
            in_flight,
            percent_complete: self.percent_complete(),
            records_per_minute: self.records_per_minute(),
            elapsed_seconds: self.elapsed().as_secs(),
        }
    }

    /// One-line progress summary
    pub fn display_string(&self) -> String {
        format!(
            "{}/{} processed ({:.1}%), {} ok, {} failed, {:.1} records/min",
            self.processed,
            self.total,
            self.percent_complete(),
            self.successful,
            self.failed,
            self.records_per_minute()
        )
    }

    /// Final report lines, failures listed with their messages
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Total candidates: {}", self.total),
            format!("Processed: {}", self.processed),
            format!("Successful: {}", self.successful),
            format!("Failed: {}", self.failed),
            format!("Peak concurrency: {}", self.peak_concurrency),
            format!("Elapsed: {:.1}s", self.elapsed().as_secs_f64()),
        ];
        if self.interrupted {
            lines.push("Run interrupted before completion".to_string());
        }
        for failure in &self.failures {
            lines.push(format!("  FAILED {}: {}", failure.record_id, failure.error));
        }
        lines
    }
}
