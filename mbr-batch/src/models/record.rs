//! Record model
//!
//! A record is one document pulled from the store: an opaque id, an optional
//! content hash, a payload in one of several encodings and several
//! alternative metadata sources.

use serde::{Deserialize, Serialize};

use super::ProcessingStatus;

/// Payload as stored, resolved once at the store-adapter boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    /// Already-decoded binary container (extended-JSON `$binary`)
    Wrapped(Vec<u8>),
    /// Raw bytes (BLOB column)
    Bytes(Vec<u8>),
    /// Text: Latin-1 reinterpreted bytes, base64 or hex
    Text(String),
}

/// Year as found in source documents (number or free text)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YearValue {
    Number(u32),
    Text(String),
}

impl YearValue {
    /// Parse to a plausible calendar year
    ///
    /// Free text like "1987-05-01" yields its leading four digits.
    pub fn as_year(&self) -> Option<u32> {
        let year = match self {
            YearValue::Number(n) => *n,
            YearValue::Text(s) => {
                let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.len() < 4 {
                    return None;
                }
                digits[..4].parse().ok()?
            }
        };
        (1000..=9999).contains(&year).then_some(year)
    }
}

/// One metadata attribute set; every field is independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAttributes {
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub year: Option<YearValue>,
    #[serde(default)]
    pub genre: Option<String>,
}

/// Alternative metadata sources carried by a record document
///
/// Field names match the JSON document layout in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSources {
    /// Operator-curated metadata
    #[serde(default, rename = "metadata")]
    pub curated: Option<TrackAttributes>,
    /// Catalog lookup metadata
    #[serde(default)]
    pub catalog: Option<TrackAttributes>,
    /// Tags embedded in the original MIDI (track name / copyright meta events)
    #[serde(default, rename = "tags")]
    pub embedded: Option<TrackAttributes>,
    /// Original file name, used as a last-resort title source
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A record pulled from the document store
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Opaque identifier, also the status-update key
    pub id: String,
    /// Content hash: natural key for idempotence and disambiguation
    pub content_hash: Option<String>,
    pub payload: Option<RawPayload>,
    pub metadata: MetadataSources,
    pub status: ProcessingStatus,
}

impl Record {
    /// Short log-friendly prefix of the content hash
    pub fn short_hash(&self) -> &str {
        match &self.content_hash {
            Some(hash) => {
                let end = hash.char_indices().nth(8).map(|(i, _)| i).unwrap_or(hash.len());
                &hash[..end]
            }
            None => "-",
        }
    }
}
