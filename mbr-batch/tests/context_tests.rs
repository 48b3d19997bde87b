//! End-to-end tests through `BatchContext`
//!
//! Configuration, JSONL import, dry run and a full run against a store
//! created in a TempDir, with fake transforms swapped in.

mod helpers;

use base64::Engine;
use helpers::*;
use mbr_batch::error::BatchError;
use mbr_batch::import::import_jsonl;
use mbr_batch::models::ProcessingStatus;
use mbr_batch::store::RecordFilter;
use mbr_batch::{BatchConfig, BatchContext};
use mbr_common::{BatchEvent, EventBus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn config_for(dirs: &TestDirs) -> BatchConfig {
    BatchConfig {
        database_path: dirs.db_path(),
        output_root: dirs.output_root(),
        work_dir: dirs.work_dir(),
        concurrency: 2,
        max_retries: 1,
        retry_base_delay_ms: 5,
        ..Default::default()
    }
}

fn jsonl_fixture() -> String {
    let payload = base64::engine::general_purpose::STANDARD.encode(sample_midi());
    let lines = [
        json!({
            "id": "one",
            "content_hash": "1111aaaa",
            "payload": payload,
            "collection": "piano",
            "metadata": {"artist": "Satie", "album": "Gymnopedies", "title": "No. 1"}
        }),
        json!({
            "id": "two",
            "payload": payload,
            "collection": "piano",
            "catalog": {"artist": "Satie", "title": "Gnossienne"}
        }),
        json!({
            "id": "three",
            "content_hash": "3333cccc",
            "payload": payload,
            "collection": "organ",
            "metadata": {"artist": "Bach", "title": "Toccata"}
        }),
    ];
    let mut text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    text.push_str("not json at all\n");
    text
}

async fn open_with_fakes(config: BatchConfig, fakes: &FakeTransforms) -> BatchContext {
    BatchContext::open(config)
        .await
        .unwrap()
        .with_transforms(fakes.transforms())
        .with_writer(test_writer())
}

#[tokio::test]
async fn test_import_then_run_filtered_batch() {
    // Given: three importable records and one bad line
    let dirs = TestDirs::new();
    let fakes = FakeTransforms::working();
    let context = open_with_fakes(config_for(&dirs), &fakes).await;

    let summary = import_jsonl(context.store(), jsonl_fixture().as_bytes())
        .await
        .unwrap();
    assert_eq!(summary.imported, 3);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].0, 4);

    let piano = RecordFilter::all().with_term("collection", "piano");
    assert_eq!(context.stats_only(&piano).await.unwrap(), 2);
    assert_eq!(context.stats_only(&RecordFilter::all()).await.unwrap(), 3);

    // When: only the piano collection is run
    let mut options = context.default_options(None);
    options.filter = piano.clone();
    let stats = context.run_batch(options, CancellationToken::new()).await.unwrap();

    // Then
    assert_eq!(stats.total, 2);
    assert_eq!(stats.successful, 2);
    assert_eq!(context.stats_only(&piano).await.unwrap(), 0);
    assert_eq!(context.stats_only(&RecordFilter::all()).await.unwrap(), 1);

    assert!(dirs
        .output_root()
        .join("Satie/Gymnopedies/No. 1.mp3")
        .is_file());
    assert!(dirs
        .output_root()
        .join("Satie/Unknown Album/Gnossienne.mp3")
        .is_file());

    let untouched = context.store().load_status("three").await.unwrap().unwrap();
    assert_eq!(untouched.status, ProcessingStatus::Unset);
    assert!(dirs.work_files().is_empty());

    context.close().await;
}

#[tokio::test]
async fn test_run_publishes_lifecycle_events() {
    // Given: a subscriber on the context's event bus
    let dirs = TestDirs::new();
    let fakes = FakeTransforms::working();
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let context = open_with_fakes(config_for(&dirs), &fakes)
        .await
        .with_event_bus(events);
    import_jsonl(context.store(), jsonl_fixture().as_bytes()).await.unwrap();

    // When
    let stats = context
        .run_batch(context.default_options(None), CancellationToken::new())
        .await
        .unwrap();

    // Then: the run is bracketed by start and finish, with progress before the end
    let seen = drain_events(&mut rx);
    assert!(matches!(
        seen.first(),
        Some(BatchEvent::RunStarted { total: 3, concurrency: 2, .. })
    ));
    match seen.last() {
        Some(BatchEvent::RunFinished { processed, successful, failed, interrupted, .. }) => {
            assert_eq!(*processed, stats.processed);
            assert_eq!(*successful, 3);
            assert_eq!(*failed, 0);
            assert!(!interrupted);
        }
        other => panic!("expected RunFinished last, got {:?}", other),
    }
    assert!(seen.iter().any(|e| matches!(
        e,
        BatchEvent::Progress { total: 3, processed: 3, in_flight: 0, .. }
    )));
    let completed = seen
        .iter()
        .filter(|e| matches!(e, BatchEvent::RecordCompleted { attempts: 1, .. }))
        .count();
    assert_eq!(completed, 3);

    context.close().await;
}

#[tokio::test]
async fn test_reset_makes_failed_records_eligible_again() {
    // Given: a run where every record fails
    let dirs = TestDirs::new();
    let silent = FakeTransforms::new(
        FakeRenderer::default(),
        FakeNormalizer {
            silent: true,
            ..Default::default()
        },
    );
    let mut config = config_for(&dirs);
    config.skip_failed = true;
    let context = open_with_fakes(config, &silent).await;
    import_jsonl(context.store(), jsonl_fixture().as_bytes()).await.unwrap();

    let stats = context
        .run_batch(context.default_options(None), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.failed, 3);
    assert_eq!(context.stats_only(&RecordFilter::all()).await.unwrap(), 0);

    // When
    let reset = context
        .store()
        .reset_status(&[ProcessingStatus::Failed])
        .await
        .unwrap();

    // Then
    assert_eq!(reset, 3);
    assert_eq!(context.stats_only(&RecordFilter::all()).await.unwrap(), 3);
    let status = context.store().load_status("one").await.unwrap().unwrap();
    assert_eq!(status.status, ProcessingStatus::Unset);
    assert_eq!(status.attempts, 0);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_dry_run_reports_checks_without_processing() {
    let dirs = TestDirs::new();
    let fakes = FakeTransforms::working();
    let context = open_with_fakes(config_for(&dirs), &fakes).await;
    import_jsonl(context.store(), jsonl_fixture().as_bytes()).await.unwrap();

    let report = context.dry_run(&RecordFilter::all()).await.unwrap();

    assert!(report.is_ok());
    assert_eq!(report.matching, 3);
    let components: Vec<&str> = report.checks.iter().map(|c| c.component.as_str()).collect();
    assert!(components.contains(&"store"));
    assert!(components.contains(&"output_root"));
    assert!(components.contains(&"work_dir"));
    assert_eq!(fakes.renderer.calls(), 0);
    assert_eq!(
        context.store().load_status("one").await.unwrap().unwrap().status,
        ProcessingStatus::Unset
    );
}

#[tokio::test]
async fn test_concurrency_above_pool_size_is_rejected() {
    let dirs = TestDirs::new();
    let fakes = FakeTransforms::working();
    let mut config = config_for(&dirs);
    config.pool_size = Some(2);
    let context = open_with_fakes(config, &fakes).await;

    let mut options = context.default_options(None);
    options.concurrency = 4;
    let result = context.run_batch(options, CancellationToken::new()).await;

    assert!(matches!(result, Err(BatchError::Configuration(msg)) if msg.contains("pool size")));
    assert_eq!(fakes.renderer.calls(), 0);
}

#[tokio::test]
async fn test_invalid_filter_field_is_rejected() {
    let dirs = TestDirs::new();
    let fakes = FakeTransforms::working();
    let context = open_with_fakes(config_for(&dirs), &fakes).await;

    let bad = RecordFilter::all().with_term("status; DROP TABLE records", "x");
    assert!(matches!(
        context.stats_only(&bad).await,
        Err(BatchError::Configuration(_))
    ));
}
