//! Payload extraction
//!
//! Normalizes a record's payload into the canonical byte buffer. Candidates
//! are tried in a fixed order and the first one starting with the Standard
//! MIDI File magic header wins:
//!
//! 1. wrapped binary container
//! 2. raw bytes / Latin-1 text reinterpreted byte-for-byte
//! 3. base64 text
//! 4. hex text

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::error::PipelineError;
use crate::models::{RawPayload, Record};

/// Standard MIDI File header chunk id
pub const MIDI_MAGIC: &[u8; 4] = b"MThd";

/// Payload bytes guaranteed to begin with `MIDI_MAGIC`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPayload(Vec<u8>);

impl CanonicalPayload {
    /// Accept `bytes` only if they carry the magic header
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        bytes.starts_with(MIDI_MAGIC).then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Extract the canonical buffer from a record
pub fn extract_payload(record: &Record) -> Result<CanonicalPayload, PipelineError> {
    match record.content_hash.as_deref() {
        Some(hash) if !hash.trim().is_empty() => {}
        _ => {
            return Err(PipelineError::MalformedPayload(
                "record has no content hash".to_string(),
            ))
        }
    }

    let payload = record
        .payload
        .as_ref()
        .ok_or_else(|| PipelineError::MalformedPayload("record has no payload".to_string()))?;

    decode_payload(payload).ok_or_else(|| {
        PipelineError::MalformedPayload(format!(
            "no encoding of the {} payload yields a MIDI header",
            payload_kind(payload)
        ))
    })
}

/// Try each encoding in order, validating the magic header
pub fn decode_payload(payload: &RawPayload) -> Option<CanonicalPayload> {
    match payload {
        RawPayload::Wrapped(bytes) => CanonicalPayload::from_bytes(bytes.clone()),
        RawPayload::Bytes(bytes) => CanonicalPayload::from_bytes(bytes.clone()).or_else(|| {
            // Text stored in a binary column
            std::str::from_utf8(bytes).ok().and_then(decode_text_encodings)
        }),
        RawPayload::Text(text) => latin1_bytes(text)
            .and_then(CanonicalPayload::from_bytes)
            .or_else(|| decode_text_encodings(text)),
    }
}

fn decode_text_encodings(text: &str) -> Option<CanonicalPayload> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    decode_base64(&compact)
        .and_then(CanonicalPayload::from_bytes)
        .or_else(|| decode_hex(&compact).and_then(CanonicalPayload::from_bytes))
}

/// Byte-for-byte reinterpretation; fails if any char is above U+00FF
fn latin1_bytes(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

fn decode_base64(text: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(text)
        .or_else(|_| STANDARD_NO_PAD.decode(text))
        .ok()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    hex::decode(digits).ok()
}

fn payload_kind(payload: &RawPayload) -> &'static str {
    match payload {
        RawPayload::Wrapped(_) => "wrapped-binary",
        RawPayload::Bytes(_) => "raw-bytes",
        RawPayload::Text(_) => "text",
    }
}
