//! JSON Lines import into the record store
//!
//! Each line is one document. `id`, `content_hash` and `payload` are lifted
//! into their columns; every other field stays in the document, where the
//! metadata sources and filter fields live. `payload` may be a string
//! (raw/Latin-1, base64 or hex text), an extended-JSON `$binary` object or
//! an array of byte values.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BatchError;
use crate::models::RawPayload;
use crate::services::payload::decode_payload;
use crate::store::sqlite::resolve_text_payload;
use crate::store::{NewRecord, SqliteRecordStore};

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: u64,
    /// `(line number, reason)` for every rejected line
    pub rejected: Vec<(usize, String)>,
}

/// Stream JSON Lines from `reader` into `store`
///
/// Malformed lines are skipped and reported; store failures abort.
pub async fn import_jsonl<R>(store: &SqliteRecordStore, reader: R) -> Result<ImportSummary, BatchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ImportSummary::default();
    let mut lines = reader.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line) {
            Ok(record) => {
                debug!(record_id = %record.id, "Importing record");
                store.upsert_record(&record).await?;
                summary.imported += 1;
            }
            Err(reason) => {
                warn!(line = line_number, reason = %reason, "Skipping import line");
                summary.rejected.push((line_number, reason));
            }
        }
    }

    Ok(summary)
}

/// Convert one JSON document into a storable record
pub fn parse_line(line: &str) -> Result<NewRecord, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;
    let Value::Object(mut document) = value else {
        return Err("document is not a JSON object".to_string());
    };

    let payload = match document.remove("payload") {
        None | Some(Value::Null) => None,
        Some(value) => Some(payload_from_json(value)?),
    };

    let content_hash = match document.remove("content_hash") {
        Some(Value::String(hash)) if !hash.trim().is_empty() => Some(hash),
        Some(Value::Null) | None => payload.as_ref().and_then(canonical_hash),
        Some(Value::String(_)) => payload.as_ref().and_then(canonical_hash),
        Some(other) => return Err(format!("content_hash must be a string, got {}", other)),
    };

    let id = match document.remove("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => content_hash
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        Some(other) => return Err(format!("unsupported id {}", other)),
    };

    Ok(NewRecord {
        id,
        content_hash,
        payload,
        document: Value::Object(document),
    })
}

fn payload_from_json(value: Value) -> Result<RawPayload, String> {
    match value {
        Value::String(text) => Ok(resolve_text_payload(text)),
        Value::Object(object) => wrapped_payload(object),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| format!("payload array holds a non-byte value {}", item))
            })
            .collect::<Result<Vec<u8>, String>>()
            .map(RawPayload::Bytes),
        other => Err(format!("unsupported payload value {}", other)),
    }
}

fn wrapped_payload(object: Map<String, Value>) -> Result<RawPayload, String> {
    match resolve_text_payload(Value::Object(object).to_string()) {
        wrapped @ RawPayload::Wrapped(_) => Ok(wrapped),
        _ => Err("payload object is not an extended-JSON $binary value".to_string()),
    }
}

/// SHA-256 of the canonical buffer, hex encoded
fn canonical_hash(payload: &RawPayload) -> Option<String> {
    let canonical = decode_payload(payload)?;
    Some(hex::encode(Sha256::digest(canonical.as_bytes())))
}
