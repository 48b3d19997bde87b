//! Shared fixtures for mbr-batch integration tests
//!
//! In-process fake transforms, a store wrapper that observes cursor
//! consumption and status traffic, and a seeded SQLite store in a TempDir.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use mbr_batch::error::TransformError;
use mbr_batch::models::{LoudnessMeasurement, ProcessingStatus, RawPayload, ResolvedTags, StatusUpdate};
use mbr_batch::services::{AtomicWriter, SpaceProbe, TempFileManager};
use mbr_batch::store::{NewRecord, RecordFilter, RecordStore, RecordStream, SqliteRecordStore, StatusExclusion};
use mbr_batch::transforms::{EncodedArtifact, Encoder, LoudnessTarget, Normalizer, Renderer, Transforms};
use mbr_batch::workflow::{BatchOrchestrator, PipelineSettings, RetryPolicy, StagePipeline};
use mbr_batch::models::Record;
use mbr_common::{BatchEvent, EventBus};
use tokio::sync::broadcast;
use serde_json::json;
use tempfile::TempDir;

/// Minimal format-0 MIDI file with one empty track
pub fn sample_midi() -> Vec<u8> {
    let mut bytes = b"MThd".to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0]);
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&[0, 0, 0, 4, 0x00, 0xFF, 0x2F, 0x00]);
    bytes
}

pub fn base64_payload() -> RawPayload {
    RawPayload::Text(base64::engine::general_purpose::STANDARD.encode(sample_midi()))
}

/// Record with curated artist/album/title
pub fn midi_record(id: &str, hash: &str, artist: &str, album: &str, title: &str) -> NewRecord {
    NewRecord {
        id: id.to_string(),
        content_hash: Some(hash.to_string()),
        payload: Some(base64_payload()),
        document: json!({
            "metadata": {"artist": artist, "album": album, "title": title},
            "collection": "test"
        }),
    }
}

/// `count` records with distinct titles and hashes
pub fn numbered_records(count: usize) -> Vec<NewRecord> {
    (0..count)
        .map(|i| {
            midi_record(
                &format!("rec-{:03}", i),
                &format!("{:08x}deadbeef", i),
                "Test Artist",
                "Test Album",
                &format!("Track {:03}", i),
            )
        })
        .collect()
}

/// Workspace directories for one test
pub struct TestDirs {
    pub root: TempDir,
}

impl TestDirs {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.path().join("records.db")
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.path().join("out")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    /// Files currently present in the work directory
    pub fn work_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

pub async fn seeded_store(dirs: &TestDirs, records: &[NewRecord]) -> Arc<SqliteRecordStore> {
    let store = SqliteRecordStore::open(&dirs.db_path(), 8).await.unwrap();
    for record in records {
        store.upsert_record(record).await.unwrap();
    }
    Arc::new(store)
}

// =============================================================================
// Fake transforms
// =============================================================================

/// Writes a fake WAV; can fail or panic for its first N calls and tracks
/// how many renders run at once
#[derive(Default)]
pub struct FakeRenderer {
    pub calls: AtomicU32,
    pub fail_first: u32,
    pub panic_first: u32,
    pub delay: Duration,
    active: AtomicUsize,
    pub peak_active: AtomicUsize,
}

impl FakeRenderer {
    pub fn failing(times: u32) -> Self {
        Self {
            fail_first: times,
            ..Default::default()
        }
    }

    pub fn panicking(times: u32) -> Self {
        Self {
            panic_first: times,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake-renderer"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        Ok("fake-renderer 1.0".to_string())
    }

    async fn render(&self, midi: &[u8], output: &Path) -> Result<(), TransformError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if call <= self.panic_first {
            panic!("renderer exploded");
        }
        if call <= self.fail_first {
            return Err(TransformError::ProcessFailed {
                program: "fake-renderer".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("synthetic failure {}", call),
            });
        }

        let mut wav = b"RIFF\0\0\0\0WAVE".to_vec();
        wav.extend_from_slice(midi);
        tokio::fs::write(output, wav).await?;
        Ok(())
    }
}

/// Copies input to output; reports silence when `silent`
#[derive(Default)]
pub struct FakeNormalizer {
    pub silent: bool,
    pub calls: AtomicU32,
}

#[async_trait]
impl Normalizer for FakeNormalizer {
    fn name(&self) -> &str {
        "fake-normalizer"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        Ok("fake-normalizer 1.0".to_string())
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        _target: &LoudnessTarget,
    ) -> Result<LoudnessMeasurement, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.silent {
            return Err(TransformError::SilentInput {
                measured_lufs: f64::NEG_INFINITY,
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(LoudnessMeasurement {
            integrated_lufs: -23.0,
            true_peak_db: -4.0,
            loudness_range: 6.5,
            threshold_lufs: -33.0,
        })
    }
}

/// Writes an "ID3"-prefixed copy and echoes the tags back
#[derive(Default)]
pub struct FakeEncoder {
    pub calls: AtomicU32,
}

#[async_trait]
impl Encoder for FakeEncoder {
    fn name(&self) -> &str {
        "fake-encoder"
    }

    async fn probe(&self) -> Result<String, TransformError> {
        Ok("fake-encoder 1.0".to_string())
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        tags: &ResolvedTags,
    ) -> Result<EncodedArtifact, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = b"ID3".to_vec();
        bytes.extend_from_slice(&tokio::fs::read(input).await?);
        tokio::fs::write(output, bytes).await?;
        Ok(EncodedArtifact {
            tags: tags.clone(),
            duration_seconds: 2.5,
        })
    }
}

pub struct FakeTransforms {
    pub renderer: Arc<FakeRenderer>,
    pub normalizer: Arc<FakeNormalizer>,
    pub encoder: Arc<FakeEncoder>,
}

impl FakeTransforms {
    pub fn new(renderer: FakeRenderer, normalizer: FakeNormalizer) -> Self {
        Self {
            renderer: Arc::new(renderer),
            normalizer: Arc::new(normalizer),
            encoder: Arc::new(FakeEncoder::default()),
        }
    }

    pub fn working() -> Self {
        Self::new(FakeRenderer::default(), FakeNormalizer::default())
    }

    pub fn transforms(&self) -> Transforms {
        Transforms::new(
            self.renderer.clone(),
            self.normalizer.clone(),
            self.encoder.clone(),
        )
    }
}

/// Unknown free space
pub struct UnboundedSpace;

impl SpaceProbe for UnboundedSpace {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        None
    }
}

pub fn test_writer() -> AtomicWriter {
    AtomicWriter::new(Arc::new(UnboundedSpace))
}

/// Unknown free space, answered after a delay like a real disk query
pub struct SlowSpace(pub Duration);

impl SpaceProbe for SlowSpace {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        std::thread::sleep(self.0);
        None
    }
}

// =============================================================================
// Observing store wrapper
// =============================================================================

/// Delegates to an inner store while recording cursor pulls and status
/// updates; can inject a cursor failure after N records
pub struct CountingStore {
    inner: Arc<dyn RecordStore>,
    pulled: Arc<AtomicUsize>,
    fail_cursor_after: Option<usize>,
    updates: Mutex<Vec<(String, StatusUpdate)>>,
    processing: Mutex<HashSet<String>>,
    peak_processing: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            pulled: Arc::new(AtomicUsize::new(0)),
            fail_cursor_after: None,
            updates: Mutex::new(Vec::new()),
            processing: Mutex::new(HashSet::new()),
            peak_processing: AtomicUsize::new(0),
        }
    }

    pub fn failing_cursor_after(mut self, records: usize) -> Self {
        self.fail_cursor_after = Some(records);
        self
    }

    /// Records yielded by cursors so far
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Highest number of records simultaneously in `processing`
    pub fn peak_processing(&self) -> usize {
        self.peak_processing.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<(String, StatusUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    /// Status sequence persisted for one record
    pub fn statuses_for(&self, record_id: &str) -> Vec<ProcessingStatus> {
        self.updates()
            .into_iter()
            .filter(|(id, _)| id == record_id)
            .map(|(_, update)| update.status())
            .collect()
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn ping(&self) -> mbr_common::Result<()> {
        self.inner.ping().await
    }

    async fn count_matching(&self, filter: &RecordFilter) -> mbr_common::Result<u64> {
        self.inner.count_matching(filter).await
    }

    async fn stream_matching(&self, filter: &RecordFilter) -> mbr_common::Result<RecordStream> {
        let pulled = Arc::clone(&self.pulled);
        let fail_after = self.fail_cursor_after;
        let stream = self.inner.stream_matching(filter).await?;

        Ok(stream
            .enumerate()
            .map(move |(index, item)| {
                if fail_after.is_some_and(|n| index >= n) {
                    return Err(mbr_common::Error::Internal("cursor lost".to_string()));
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                item
            })
            .boxed())
    }

    async fn update_status(&self, record_id: &str, update: &StatusUpdate) -> mbr_common::Result<()> {
        {
            let mut processing = self.processing.lock().unwrap();
            match update {
                StatusUpdate::Processing { .. } => {
                    processing.insert(record_id.to_string());
                    self.peak_processing.fetch_max(processing.len(), Ordering::SeqCst);
                }
                _ => {
                    processing.remove(record_id);
                }
            }
        }
        self.updates
            .lock()
            .unwrap()
            .push((record_id.to_string(), update.clone()));
        self.inner.update_status(record_id, update).await
    }
}

// =============================================================================
// Assembly
// =============================================================================

pub fn settings(dirs: &TestDirs, max_retries: u32) -> PipelineSettings {
    PipelineSettings {
        output_root: dirs.output_root(),
        output_extension: "mp3".to_string(),
        target: LoudnessTarget::default(),
        retry: RetryPolicy::new(max_retries, Duration::from_millis(5)),
    }
}

pub fn pipeline(
    dirs: &TestDirs,
    store: Arc<dyn RecordStore>,
    fakes: &FakeTransforms,
    temp_files: &TempFileManager,
    max_retries: u32,
) -> StagePipeline {
    pipeline_with(dirs, store, fakes, temp_files, max_retries, test_writer(), EventBus::default())
}

pub fn pipeline_with(
    dirs: &TestDirs,
    store: Arc<dyn RecordStore>,
    fakes: &FakeTransforms,
    temp_files: &TempFileManager,
    max_retries: u32,
    writer: AtomicWriter,
    events: EventBus,
) -> StagePipeline {
    StagePipeline::new(
        store,
        fakes.transforms(),
        temp_files.clone(),
        writer,
        settings(dirs, max_retries),
        events,
    )
}

pub fn orchestrator(
    dirs: &TestDirs,
    store: Arc<dyn RecordStore>,
    fakes: &FakeTransforms,
    max_retries: u32,
) -> (BatchOrchestrator, TempFileManager) {
    orchestrator_with_writer(dirs, store, fakes, max_retries, test_writer())
}

pub fn orchestrator_with_writer(
    dirs: &TestDirs,
    store: Arc<dyn RecordStore>,
    fakes: &FakeTransforms,
    max_retries: u32,
    writer: AtomicWriter,
) -> (BatchOrchestrator, TempFileManager) {
    let temp_files = TempFileManager::new(dirs.work_dir());
    let events = EventBus::default();
    let pipeline = pipeline_with(
        dirs,
        Arc::clone(&store),
        fakes,
        &temp_files,
        max_retries,
        writer,
        events.clone(),
    );
    let orchestrator = BatchOrchestrator::new(
        store,
        Arc::new(pipeline),
        temp_files.clone(),
        StatusExclusion::default(),
        Duration::from_secs(60),
        events,
    );
    (orchestrator, temp_files)
}

/// Events already delivered to `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Load a record by id through the store's cursor
pub async fn fetch_record(store: &SqliteRecordStore, id: &str) -> Record {
    let filter = RecordFilter::all();
    let mut stream = store.stream_matching(&filter).await.unwrap();
    while let Some(record) = stream.next().await {
        let record = record.unwrap();
        if record.id == id {
            return record;
        }
    }
    panic!("record {} not found", id);
}
