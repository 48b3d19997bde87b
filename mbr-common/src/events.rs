//! Event types for the batch event system
//!
//! Provides the `BatchEvent` enum and the `EventBus` used to fan out run
//! progress to any number of listeners (log sink, future UI, tests).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Batch run events
///
/// Events are broadcast via `EventBus` and serialize with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchEvent {
    /// Orchestrator resolved its candidate count and is about to open the cursor
    RunStarted {
        total: u64,
        concurrency: usize,
        timestamp: DateTime<Utc>,
    },
    /// A record was admitted into a worker slot
    RecordStarted {
        record_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A record's pipeline attempt entered a new stage
    StageEntered {
        record_id: String,
        stage: String,
        attempt: u32,
    },
    /// A pipeline attempt failed and will be retried after `delay_ms`
    RecordRetrying {
        record_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    /// Record committed and persisted as completed
    RecordCompleted {
        record_id: String,
        output_path: String,
        attempts: u32,
    },
    /// Record exhausted its retries and was persisted as failed
    RecordFailed {
        record_id: String,
        error: String,
        attempts: u32,
    },
    /// Periodic progress snapshot
    Progress {
        total: u64,
        processed: u64,
        successful: u64,
        failed: u64,
        in_flight: usize,
        percent_complete: f64,
        records_per_minute: f64,
        elapsed_seconds: u64,
    },
    /// Run finished (cursor exhausted and all units drained, or interrupted)
    RunFinished {
        processed: u64,
        successful: u64,
        failed: u64,
        interrupted: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for `BatchEvent`
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BatchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: BatchEvent) -> Result<usize, broadcast::error::SendError<BatchEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Write events from `rx` to `out` as JSON lines
///
/// Stops after `RunFinished` or when every sender is gone, and returns the
/// number of lines written. Events lost to lag are skipped.
pub async fn write_json_lines<W>(mut rx: broadcast::Receiver<BatchEvent>, mut out: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event writer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        written += 1;

        if matches!(event, BatchEvent::RunFinished { .. }) {
            break;
        }
    }
    out.flush().await?;
    Ok(written)
}
