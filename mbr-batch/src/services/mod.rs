//! Services used by the stage pipeline

pub mod atomic_writer;
pub mod metadata_resolver;
pub mod output_path;
pub mod payload;
pub mod temp_files;

pub use atomic_writer::{AtomicWriter, CommitOutcome, SpaceProbe, SysinfoSpaceProbe};
pub use metadata_resolver::{resolve_metadata, MetadataSourceKind, ResolvedMetadata};
pub use output_path::{disambiguate, sanitize_component, OutputPathResolver};
pub use payload::{extract_payload, CanonicalPayload, MIDI_MAGIC};
pub use temp_files::{TempFileGuard, TempFileManager, TempScope};
