//! Record schema migration
//!
//! Records written before schema versioning carry no `schema_version` and use
//! camelCase flags (`image`, `takenAt`, `signedUrl`, `isUploaded`,
//! `isCreated`) next to loose owner fields. Owner and target layouts differ
//! per pipeline, so a `LegacyDecoder` supplied by the pipeline reads them.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::entities::{
    OwnerContext, PendingArtifact, SignedTarget, CURRENT_SCHEMA_VERSION,
};

/// Reads the pipeline-specific parts of an unversioned record.
pub trait LegacyDecoder<O>: Send + Sync {
    /// Owner context from the top-level record object
    fn decode_owner(&self, raw: &Map<String, Value>) -> Option<O>;

    /// Signed target from the stored sign response
    fn decode_target(&self, raw: &Value) -> Option<SignedTarget>;
}

/// Outcome of decoding a stored record
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord<O> {
    /// Written with the current schema
    Current(PendingArtifact<O>),
    /// Unversioned record converted in memory; not yet rewritten
    Legacy(PendingArtifact<O>),
    /// Corrupt, unknown or from a newer schema
    Unreadable(String),
}

impl<O> DecodedRecord<O> {
    /// The usable record, if any
    pub fn into_record(self) -> Option<PendingArtifact<O>> {
        match self {
            Self::Current(record) | Self::Legacy(record) => Some(record),
            Self::Unreadable(_) => None,
        }
    }
}

/// Decode a stored record value.
pub fn decode_record<O: OwnerContext>(
    key: &str,
    raw: &str,
    legacy: Option<&dyn LegacyDecoder<O>>,
) -> DecodedRecord<O> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => return DecodedRecord::Unreadable(format!("invalid JSON: {}", e)),
    };
    let Some(object) = value.as_object() else {
        return DecodedRecord::Unreadable("record is not an object".to_string());
    };

    match object.get("schema_version") {
        Some(version) => {
            let version = version.as_u64().unwrap_or(u64::MAX);
            if version > u64::from(CURRENT_SCHEMA_VERSION) {
                return DecodedRecord::Unreadable(format!(
                    "unsupported schema version {}",
                    version
                ));
            }
            match serde_json::from_value(value) {
                Ok(record) => DecodedRecord::Current(record),
                Err(e) => DecodedRecord::Unreadable(e.to_string()),
            }
        }
        None => match legacy {
            Some(decoder) => decode_legacy(key, object, decoder),
            None => DecodedRecord::Unreadable("unversioned record".to_string()),
        },
    }
}

fn decode_legacy<O>(
    key: &str,
    raw: &Map<String, Value>,
    decoder: &dyn LegacyDecoder<O>,
) -> DecodedRecord<O> {
    let Some(owner) = decoder.decode_owner(raw) else {
        return DecodedRecord::Unreadable("legacy record has no owner".to_string());
    };

    // Legacy records were always stored under their image path
    let mut record = PendingArtifact::new(key, owner);
    if let Some(captured_at) = raw.get("takenAt").and_then(parse_timestamp) {
        record.captured_at = captured_at;
    }

    let target = raw
        .get("signedUrl")
        .filter(|v| !v.is_null())
        .and_then(|v| decoder.decode_target(v));
    if let Some(target) = target {
        if let Err(e) = record.mark_signed(target) {
            return DecodedRecord::Unreadable(e.to_string());
        }
    }

    // Flags that break the stage order are dropped; the stage simply reruns.
    if flag(raw, "isUploaded") && record.mark_uploaded().is_err() {
        tracing::debug!(key = %key, "Dropping legacy upload flag without signed target");
    }
    if flag(raw, "isCreated") && record.mark_registered().is_err() {
        tracing::debug!(key = %key, "Dropping legacy created flag before upload");
    }

    DecodedRecord::Legacy(record)
}

fn flag(raw: &Map<String, Value>, name: &str) -> bool {
    raw.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(millis) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
