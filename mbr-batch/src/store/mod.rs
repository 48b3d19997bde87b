//! Document store collaborator
//!
//! The core consumes the store through the narrow `RecordStore` trait:
//! count, lazy stream, status update. `SqliteRecordStore` is the bundled
//! adapter; tests wrap it to observe cursor consumption.

pub mod filter;
pub mod sqlite;

pub use filter::{RecordFilter, StatusExclusion};
pub use sqlite::{NewRecord, SqliteRecordStore, StoredStatus};

use async_trait::async_trait;
use futures::stream::BoxStream;
use mbr_common::Result;

use crate::models::{Record, StatusUpdate};

/// Lazy, finite, non-restartable record sequence
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Document store operations used by the orchestrator and pipeline
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Cheap reachability check
    async fn ping(&self) -> Result<()>;

    /// Number of records matching `filter`
    async fn count_matching(&self, filter: &RecordFilter) -> Result<u64>;

    /// Open a cursor over records matching `filter`, in store order
    async fn stream_matching(&self, filter: &RecordFilter) -> Result<RecordStream>;

    /// Persist a status transition for `record_id`
    async fn update_status(&self, record_id: &str, update: &StatusUpdate) -> Result<()>;
}
