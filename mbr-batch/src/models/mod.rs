//! Data models for mbr-batch

pub mod pipeline_state;
pub mod record;
pub mod stats;
pub mod status;

pub use pipeline_state::Stage;
pub use record::{MetadataSources, RawPayload, Record, TrackAttributes, YearValue};
pub use stats::{FailedRecord, ProcessingStats};
pub use status::{
    CompletionRecord, LoudnessMeasurement, ProcessingStatus, ResolvedTags, StatusUpdate,
};
