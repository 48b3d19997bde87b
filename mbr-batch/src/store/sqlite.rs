//! SQLite document store adapter
//!
//! Records live in one `records` table. The `payload` column has no type
//! affinity, so the storage class read back (BLOB or TEXT) discriminates the
//! payload encoding; extended-JSON `$binary` text is unwrapped here so the
//! pipeline only ever sees a resolved `RawPayload`.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use mbr_common::{Error, Result};
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::filter::is_safe_field;
use super::{RecordFilter, RecordStore, RecordStream};
use crate::models::{
    LoudnessMeasurement, MetadataSources, ProcessingStatus, RawPayload, Record, ResolvedTags,
    StatusUpdate,
};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

const RECORD_COLUMNS: &str = r#"
    id,
    content_hash,
    typeof(payload) AS payload_type,
    CASE WHEN typeof(payload) = 'blob' THEN payload END AS payload_blob,
    CASE WHEN typeof(payload) = 'text' THEN payload END AS payload_text,
    document,
    status
"#;

/// Document to insert (import tooling and tests)
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: String,
    pub content_hash: Option<String>,
    pub payload: Option<RawPayload>,
    /// Metadata sources and any other document fields
    pub document: Value,
}

/// Persisted status fields for one record
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStatus {
    pub status: ProcessingStatus,
    pub attempts: u32,
    pub status_updated_at: Option<String>,
    pub output_path: Option<String>,
    pub duration_seconds: Option<f64>,
    pub loudness: Option<LoudnessMeasurement>,
    pub tags: Option<ResolvedTags>,
    pub error: Option<String>,
}

/// SQLite-backed `RecordStore`
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    max_lock_wait: Duration,
}

#[derive(Debug, Clone)]
enum BindValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

#[derive(Debug)]
struct WhereClause {
    sql: String,
    binds: Vec<BindValue>,
}

impl SqliteRecordStore {
    /// Open (or create) the store at `db_path` with `pool_size` connections
    pub async fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        let pool = mbr_common::db::init_database(db_path, pool_size).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait: DEFAULT_MAX_LOCK_WAIT,
        }
    }

    /// Bound the time a status write waits out lock contention
    pub fn with_max_lock_wait(mut self, max_lock_wait: Duration) -> Self {
        self.max_lock_wait = max_lock_wait;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or replace a document; status fields are left untouched
    pub async fn upsert_record(&self, record: &NewRecord) -> Result<()> {
        let document = serde_json::to_string(&record.document)
            .map_err(|e| Error::InvalidInput(format!("Failed to serialize document: {}", e)))?;
        let wrapped_text = match &record.payload {
            Some(RawPayload::Wrapped(bytes)) => Some(encode_extended_json_binary(bytes)),
            _ => None,
        };

        let query = sqlx::query(
            r#"
            INSERT INTO records (id, content_hash, payload, document)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_hash = excluded.content_hash,
                payload = excluded.payload,
                document = excluded.document
            "#,
        )
        .bind(&record.id)
        .bind(&record.content_hash);

        let query = match (&record.payload, &wrapped_text) {
            (Some(RawPayload::Wrapped(_)), Some(text)) => query.bind(text.as_str()),
            (Some(RawPayload::Bytes(bytes)), _) => query.bind(bytes.as_slice()),
            (Some(RawPayload::Text(text)), _) => query.bind(text.as_str()),
            _ => query.bind(Option::<String>::None),
        };

        query.bind(&document).execute(&self.pool).await?;
        Ok(())
    }

    /// Operator reset: move records in `statuses` back to unset
    pub async fn reset_status(&self, statuses: &[ProcessingStatus]) -> Result<u64> {
        let values: Vec<&'static str> = statuses.iter().filter_map(|s| s.as_db_value()).collect();
        if values.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "UPDATE records SET status = NULL, status_updated_at = ?, attempts = 0, error = NULL \
             WHERE status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(timestamp(Utc::now()));
        for value in &values {
            query = query.bind(*value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Read back the persisted status fields of one record
    pub async fn load_status(&self, record_id: &str) -> Result<Option<StoredStatus>> {
        let row = sqlx::query(
            r#"
            SELECT status, attempts, status_updated_at, output_path, duration_seconds,
                   loudness, tags, error
            FROM records
            WHERE id = ?
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: Option<String> = row.try_get("status")?;
        let status = ProcessingStatus::from_db_value(status.as_deref()).map_err(Error::Internal)?;
        let attempts: i64 = row.try_get("attempts")?;
        let loudness: Option<String> = row.try_get("loudness")?;
        let tags: Option<String> = row.try_get("tags")?;

        Ok(Some(StoredStatus {
            status,
            attempts: attempts.max(0) as u32,
            status_updated_at: row.try_get("status_updated_at")?,
            output_path: row.try_get("output_path")?,
            duration_seconds: row.try_get("duration_seconds")?,
            loudness: loudness.as_deref().map(parse_json_column).transpose()?,
            tags: tags.as_deref().map(parse_json_column).transpose()?,
            error: row.try_get("error")?,
        }))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn count_matching(&self, filter: &RecordFilter) -> Result<u64> {
        let clause = build_where(filter, Utc::now())?;
        let sql = format!("SELECT COUNT(*) FROM records WHERE {}", clause.sql);
        let row = bind_all(sqlx::query(&sql), &clause.binds)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn stream_matching(&self, filter: &RecordFilter) -> Result<RecordStream> {
        let clause = build_where(filter, Utc::now())?;
        let sql = format!(
            "SELECT {} FROM records WHERE {} ORDER BY rowid",
            RECORD_COLUMNS, clause.sql
        );
        let binds = clause.binds;
        let pool = self.pool.clone();

        debug!(sql = %sql, "Opening record cursor");

        let stream = async_stream::stream! {
            let query = bind_all(sqlx::query(&sql), &binds);
            let mut rows = query.fetch(&pool);
            while let Some(row) = rows.next().await {
                yield row.map_err(Error::from).and_then(|row| record_from_row(&row));
            }
        };

        Ok(Box::pin(stream))
    }

    async fn update_status(&self, record_id: &str, update: &StatusUpdate) -> Result<()> {
        // Prepare all data BEFORE acquiring a connection
        let status = update.status().as_db_value().unwrap_or("processing");
        let updated_at = timestamp(Utc::now());
        let (attempts, output_path, duration, loudness, tags, error) = match update {
            StatusUpdate::Processing { attempt } => (*attempt, None, None, None, None, None),
            StatusUpdate::Completed {
                attempts,
                completion,
            } => (
                *attempts,
                Some(completion.output_path.clone()),
                Some(completion.duration_seconds),
                Some(to_json_column(&completion.loudness)?),
                Some(to_json_column(&completion.tags)?),
                None,
            ),
            StatusUpdate::Failed { attempts, error } => {
                (*attempts, None, None, None, None, Some(error.clone()))
            }
        };

        let rows = retry_on_lock("update_status", self.max_lock_wait, || async {
            let result = sqlx::query(
                r#"
                UPDATE records SET
                    status = ?,
                    status_updated_at = ?,
                    attempts = ?,
                    output_path = COALESCE(?, output_path),
                    duration_seconds = COALESCE(?, duration_seconds),
                    loudness = COALESCE(?, loudness),
                    tags = COALESCE(?, tags),
                    error = ?
                WHERE id = ?
                "#,
            )
            .bind(status)
            .bind(&updated_at)
            .bind(attempts as i64)
            .bind(&output_path)
            .bind(duration)
            .bind(&loudness)
            .bind(&tags)
            .bind(&error)
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("record {}", record_id)));
        }

        debug!(record_id, status, attempts, "Persisted status");
        Ok(())
    }
}

/// Translate a filter into a WHERE clause with positional binds
fn build_where(filter: &RecordFilter, now: DateTime<Utc>) -> Result<WhereClause> {
    let mut clauses = vec!["1 = 1".to_string()];
    let mut binds = Vec::new();

    for (field, value) in &filter.predicate {
        if !is_safe_field(field) {
            return Err(Error::InvalidInput(format!(
                "Unsupported filter field '{}'",
                field
            )));
        }
        let path = format!("$.{}", field);
        match value {
            Value::Null => {
                clauses.push("json_extract(document, ?) IS NULL".to_string());
                binds.push(BindValue::Text(path));
            }
            Value::Bool(b) => {
                clauses.push("json_extract(document, ?) = ?".to_string());
                binds.push(BindValue::Text(path));
                binds.push(BindValue::Integer(i64::from(*b)));
            }
            Value::Number(n) => {
                clauses.push("json_extract(document, ?) = ?".to_string());
                binds.push(BindValue::Text(path));
                match n.as_i64() {
                    Some(i) => binds.push(BindValue::Integer(i)),
                    None => binds.push(BindValue::Real(n.as_f64().unwrap_or(f64::NAN))),
                }
            }
            Value::String(s) => {
                clauses.push("json_extract(document, ?) = ?".to_string());
                binds.push(BindValue::Text(path));
                binds.push(BindValue::Text(s.clone()));
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::InvalidInput(format!(
                    "Filter field '{}' must be a scalar value",
                    field
                )));
            }
        }
    }

    if let Some(exclusion) = &filter.exclusion {
        if exclusion.exclude_failed {
            clauses.push("COALESCE(status, '') NOT IN ('completed', 'failed')".to_string());
        } else {
            clauses.push("COALESCE(status, '') <> 'completed'".to_string());
        }

        if let Some(stale_after) = exclusion.stale_processing_after {
            let cutoff = chrono::Duration::from_std(stale_after)
                .ok()
                .and_then(|window| now.checked_sub_signed(window));
            match cutoff {
                Some(cutoff) => {
                    clauses.push(
                        "NOT (COALESCE(status, '') = 'processing' AND COALESCE(status_updated_at, '') > ?)"
                            .to_string(),
                    );
                    binds.push(BindValue::Text(timestamp(cutoff)));
                }
                // Window reaches past the representable calendar: nothing goes stale
                None => clauses.push("COALESCE(status, '') <> 'processing'".to_string()),
            }
        }
    }

    Ok(WhereClause {
        sql: clauses.join(" AND "),
        binds,
    })
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            BindValue::Text(s) => query.bind(s.as_str()),
            BindValue::Integer(i) => query.bind(*i),
            BindValue::Real(f) => query.bind(*f),
        };
    }
    query
}

fn record_from_row(row: &SqliteRow) -> Result<Record> {
    let id: String = row.try_get("id")?;
    let content_hash: Option<String> = row.try_get("content_hash")?;
    let payload_type: String = row.try_get("payload_type")?;

    let payload = match payload_type.as_str() {
        "blob" => row
            .try_get::<Option<Vec<u8>>, _>("payload_blob")?
            .map(RawPayload::Bytes),
        "text" => row
            .try_get::<Option<String>, _>("payload_text")?
            .map(resolve_text_payload),
        "null" => None,
        other => {
            warn!(record_id = %id, payload_type = other, "Ignoring non-binary payload column");
            None
        }
    };

    let document: String = row.try_get("document")?;
    let metadata = match serde_json::from_str::<MetadataSources>(&document) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(record_id = %id, error = %e, "Unreadable metadata document, using placeholders");
            MetadataSources::default()
        }
    };

    let status: Option<String> = row.try_get("status")?;
    let status = ProcessingStatus::from_db_value(status.as_deref()).map_err(Error::Internal)?;

    Ok(Record {
        id,
        content_hash,
        payload,
        metadata,
        status,
    })
}

/// Unwrap extended-JSON `$binary` text, otherwise keep the text as-is
pub(crate) fn resolve_text_payload(text: String) -> RawPayload {
    if text.trim_start().starts_with('{') {
        if let Some(bytes) = decode_extended_json_binary(&text) {
            return RawPayload::Wrapped(bytes);
        }
    }
    RawPayload::Text(text)
}

/// Accepts `{"$binary": {"base64": "...", "subType": "00"}}` and the legacy
/// `{"$binary": "...", "$type": "00"}` form
fn decode_extended_json_binary(text: &str) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let encoded = match value.get("$binary")? {
        Value::String(s) => s.as_str(),
        Value::Object(inner) => inner.get("base64")?.as_str()?,
        _ => return None,
    };
    BASE64.decode(encoded.trim()).ok()
}

fn encode_extended_json_binary(bytes: &[u8]) -> String {
    serde_json::json!({ "$binary": { "base64": BASE64.encode(bytes), "subType": "00" } })
        .to_string()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json_column<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize column: {}", e)))
}

fn parse_json_column<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize column: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionRecord;
    use crate::store::StatusExclusion;
    use futures::TryStreamExt;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteRecordStore {
        SqliteRecordStore::open(&dir.path().join("store.db"), 4).await.unwrap()
    }

    fn new_record(id: &str, payload: RawPayload, document: Value) -> NewRecord {
        NewRecord {
            id: id.to_string(),
            content_hash: Some(format!("hash-{}", id)),
            payload: Some(payload),
            document,
        }
    }

    #[tokio::test]
    async fn test_payload_union_resolved_from_storage_class() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .upsert_record(&new_record("blob", RawPayload::Bytes(b"MThd\0".to_vec()), serde_json::json!({})))
            .await
            .unwrap();
        store
            .upsert_record(&new_record("text", RawPayload::Text("TVRoZA==".to_string()), serde_json::json!({})))
            .await
            .unwrap();
        store
            .upsert_record(&new_record("wrapped", RawPayload::Wrapped(b"MThd\x01".to_vec()), serde_json::json!({})))
            .await
            .unwrap();

        let records: Vec<Record> = store
            .stream_matching(&RecordFilter::all())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, Some(RawPayload::Bytes(b"MThd\0".to_vec())));
        assert_eq!(records[1].payload, Some(RawPayload::Text("TVRoZA==".to_string())));
        assert_eq!(records[2].payload, Some(RawPayload::Wrapped(b"MThd\x01".to_vec())));
    }

    #[tokio::test]
    async fn test_predicate_and_exclusion_applied_to_count_and_stream() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        for (id, collection) in [("a", "jazz"), ("b", "jazz"), ("c", "rock"), ("d", "jazz")] {
            store
                .upsert_record(&new_record(
                    id,
                    RawPayload::Bytes(b"MThd".to_vec()),
                    serde_json::json!({ "collection": collection }),
                ))
                .await
                .unwrap();
        }

        store
            .update_status("b", &StatusUpdate::Failed { attempts: 3, error: "boom".to_string() })
            .await
            .unwrap();
        store
            .update_status(
                "d",
                &StatusUpdate::Completed {
                    attempts: 1,
                    completion: CompletionRecord {
                        output_path: "/out/x.mp3".to_string(),
                        duration_seconds: 1.0,
                        loudness: LoudnessMeasurement {
                            integrated_lufs: -20.0,
                            true_peak_db: -3.0,
                            loudness_range: 5.0,
                            threshold_lufs: -30.0,
                        },
                        tags: ResolvedTags::default(),
                        bytes_written: 10,
                    },
                },
            )
            .await
            .unwrap();

        let jazz = RecordFilter::all().with_term("collection", "jazz");
        assert_eq!(store.count_matching(&jazz).await.unwrap(), 3);

        let retry_failed = jazz.with_exclusion(StatusExclusion::default());
        assert_eq!(store.count_matching(&retry_failed).await.unwrap(), 2);

        let skip_failed = jazz.with_exclusion(StatusExclusion {
            exclude_failed: true,
            ..StatusExclusion::default()
        });
        let ids: Vec<String> = store
            .stream_matching(&skip_failed)
            .await
            .unwrap()
            .map_ok(|r| r.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_fresh_processing_excluded_stale_processing_eligible() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .upsert_record(&new_record("p", RawPayload::Bytes(b"MThd".to_vec()), serde_json::json!({})))
            .await
            .unwrap();
        store
            .update_status("p", &StatusUpdate::Processing { attempt: 1 })
            .await
            .unwrap();

        let fresh_window = RecordFilter::all().with_exclusion(StatusExclusion {
            exclude_failed: false,
            stale_processing_after: Some(Duration::from_secs(3600)),
        });
        assert_eq!(store.count_matching(&fresh_window).await.unwrap(), 0);

        // Backdate the status update past the window
        sqlx::query("UPDATE records SET status_updated_at = '2000-01-01T00:00:00.000000Z'")
            .execute(store.pool())
            .await
            .unwrap();
        assert_eq!(store.count_matching(&fresh_window).await.unwrap(), 1);

        let always_eligible = RecordFilter::all().with_exclusion(StatusExclusion {
            exclude_failed: false,
            stale_processing_after: None,
        });
        assert_eq!(store.count_matching(&always_eligible).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_processing_window_never_reclaims() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for id in ["p", "u"] {
            store
                .upsert_record(&new_record(id, RawPayload::Bytes(b"MThd".to_vec()), serde_json::json!({})))
                .await
                .unwrap();
        }
        store
            .update_status("p", &StatusUpdate::Processing { attempt: 1 })
            .await
            .unwrap();
        sqlx::query("UPDATE records SET status_updated_at = '2000-01-01T00:00:00.000000Z' WHERE id = 'p'")
            .execute(store.pool())
            .await
            .unwrap();

        for window in [Duration::from_secs(u64::MAX), Duration::MAX] {
            let filter = RecordFilter::all().with_exclusion(StatusExclusion {
                exclude_failed: false,
                stale_processing_after: Some(window),
            });
            assert_eq!(store.count_matching(&filter).await.unwrap(), 1);
            let ids: Vec<String> = store
                .stream_matching(&filter)
                .await
                .unwrap()
                .map_ok(|record| record.id)
                .try_collect()
                .await
                .unwrap();
            assert_eq!(ids, vec!["u".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_lock_wait_bound_is_configurable() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await.with_max_lock_wait(Duration::from_millis(50));
        assert_eq!(store.max_lock_wait, Duration::from_millis(50));
        store
            .upsert_record(&new_record("r", RawPayload::Bytes(b"MThd".to_vec()), serde_json::json!({})))
            .await
            .unwrap();
        store
            .update_status("r", &StatusUpdate::Processing { attempt: 1 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_status_round_trip_and_missing_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .upsert_record(&new_record("r", RawPayload::Bytes(b"MThd".to_vec()), serde_json::json!({})))
            .await
            .unwrap();

        store
            .update_status("r", &StatusUpdate::Processing { attempt: 2 })
            .await
            .unwrap();
        let stored = store.load_status("r").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Processing);
        assert_eq!(stored.attempts, 2);
        assert!(stored.status_updated_at.is_some());

        store
            .update_status("r", &StatusUpdate::Failed { attempts: 3, error: "silent".to_string() })
            .await
            .unwrap();
        let stored = store.load_status("r").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("silent"));

        let missing = store
            .update_status("nope", &StatusUpdate::Processing { attempt: 1 })
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_status() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        for id in ["a", "b"] {
            store
                .upsert_record(&new_record(id, RawPayload::Bytes(b"MThd".to_vec()), serde_json::json!({})))
                .await
                .unwrap();
        }
        store
            .update_status("a", &StatusUpdate::Failed { attempts: 3, error: "x".to_string() })
            .await
            .unwrap();

        let reset = store.reset_status(&[ProcessingStatus::Failed]).await.unwrap();
        assert_eq!(reset, 1);
        let stored = store.load_status("a").await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Unset);
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_unsafe_filter_fields_rejected() {
        let filter = RecordFilter::all().with_term("a') OR 1=1 --", "x");
        assert!(matches!(build_where(&filter, Utc::now()), Err(Error::InvalidInput(_))));

        let nested = RecordFilter::all().with_term("meta", serde_json::json!({"a": 1}));
        assert!(matches!(build_where(&nested, Utc::now()), Err(Error::InvalidInput(_))));

        assert!(is_safe_field("catalog.artist"));
        assert!(!is_safe_field("catalog..artist"));
        assert!(!is_safe_field("1abc"));
    }

    #[test]
    fn test_extended_json_binary_forms() {
        assert_eq!(
            decode_extended_json_binary(r#"{"$binary": {"base64": "TVRoZA==", "subType": "00"}}"#),
            Some(b"MThd".to_vec())
        );
        assert_eq!(
            decode_extended_json_binary(r#"{"$binary": "TVRoZA==", "$type": "00"}"#),
            Some(b"MThd".to_vec())
        );
        assert_eq!(decode_extended_json_binary(r#"{"other": 1}"#), None);
        assert_eq!(
            resolve_text_payload("{not json".to_string()),
            RawPayload::Text("{not json".to_string())
        );
    }
}
