//! Record filter
//!
//! The predicate is opaque to the core: it is passed to the store unchanged.
//! The orchestrator appends a `StatusExclusion` so duplicate suppression is
//! a property of the query rather than of in-memory tracking.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Status-exclusion clause appended by the orchestrator
///
/// `completed` records are always excluded. `failed` records are excluded
/// when `exclude_failed` is set. `processing` records are excluded while
/// their last status update is younger than `stale_processing_after`; older
/// ones are treated as crash leftovers and become eligible again. With
/// `stale_processing_after = None` every `processing` record is eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusExclusion {
    pub exclude_failed: bool,
    pub stale_processing_after: Option<Duration>,
}

impl Default for StatusExclusion {
    fn default() -> Self {
        Self {
            exclude_failed: false,
            stale_processing_after: Some(Duration::from_secs(60 * 60)),
        }
    }
}

/// Query predicate plus optional status exclusion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Opaque predicate: document field → scalar value
    #[serde(default)]
    pub predicate: Map<String, Value>,
    #[serde(skip)]
    pub exclusion: Option<StatusExclusion>,
}

impl RecordFilter {
    pub fn new(predicate: Map<String, Value>) -> Self {
        Self {
            predicate,
            exclusion: None,
        }
    }

    /// Match every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Add one `field = value` term
    pub fn with_term(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicate.insert(field.into(), value.into());
        self
    }

    /// Copy of this filter with the exclusion clause appended
    pub fn with_exclusion(&self, exclusion: StatusExclusion) -> Self {
        Self {
            predicate: self.predicate.clone(),
            exclusion: Some(exclusion),
        }
    }

    /// Parse a `field=value` CLI term; numbers and booleans keep their JSON type
    pub fn parse_term(term: &str) -> Result<(String, Value), String> {
        let (field, raw) = term
            .split_once('=')
            .ok_or_else(|| format!("filter term '{}' is not field=value", term))?;
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("filter term '{}' has an empty field", term));
        }
        let raw = raw.trim();
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => v,
            _ => Value::String(raw.to_string()),
        };
        Ok((field.to_string(), value))
    }

    /// Reject field names and values the store cannot translate
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in &self.predicate {
            if !is_safe_field(field) {
                return Err(format!("unsupported filter field '{}'", field));
            }
            if value.is_array() || value.is_object() {
                return Err(format!("filter field '{}' must be a scalar value", field));
            }
        }
        Ok(())
    }
}

/// Dotted identifier path, e.g. `collection` or `catalog.label`
pub(crate) fn is_safe_field(field: &str) -> bool {
    !field.is_empty()
        && field.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_exclusion_keeps_predicate_untouched() {
        let filter = RecordFilter::all().with_term("collection", "piano");
        let excluded = filter.with_exclusion(StatusExclusion::default());
        assert_eq!(excluded.predicate, filter.predicate);
        assert!(filter.exclusion.is_none());
        assert!(excluded.exclusion.is_some());
    }

    #[test]
    fn test_parse_term_types() {
        assert_eq!(
            RecordFilter::parse_term("source=archive").unwrap(),
            ("source".to_string(), Value::String("archive".to_string()))
        );
        assert_eq!(
            RecordFilter::parse_term("tracks = 3").unwrap(),
            ("tracks".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            RecordFilter::parse_term("verified=true").unwrap(),
            ("verified".to_string(), Value::Bool(true))
        );
        assert!(RecordFilter::parse_term("novalue").is_err());
        assert!(RecordFilter::parse_term("=x").is_err());
    }

    #[test]
    fn test_validate_rejects_unsafe_fields_and_nested_values() {
        assert!(RecordFilter::all().with_term("catalog.label", "x").validate().is_ok());
        assert!(RecordFilter::all().with_term("a') OR 1=1 --", "x").validate().is_err());
        assert!(RecordFilter::all().with_term("1abc", "x").validate().is_err());
        assert!(RecordFilter::all()
            .with_term("tags", serde_json::json!(["a"]))
            .validate()
            .is_err());
    }

    #[test]
    fn test_predicate_deserializes_from_toml_table() {
        let table: toml::Value = toml::from_str("[predicate]\ncollection = \"jazz\"\nyear = 1999\n").unwrap();
        let json = serde_json::to_value(table).unwrap();
        let filter: RecordFilter = serde_json::from_value(json).unwrap();
        assert_eq!(filter.predicate["collection"], "jazz");
        assert_eq!(filter.predicate["year"], 1999);
    }
}
