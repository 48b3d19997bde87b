//! # MBR Common Library
//!
//! Shared code for the MIDI batch render workspace:
//! - Error and Result types
//! - Configuration file location and loading
//! - SQLite pool initialization and the `records` schema
//! - Batch event types and the broadcast EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{write_json_lines, BatchEvent, EventBus};
