//! Domain entities for the Uploads domain
//!
//! A `PendingArtifact` is one locally captured file on its way to the
//! backend. Stage flags only ever move forward; the guarded `mark_*`
//! methods are the only way to advance them.

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::state::{StateError, UploadEvent, UploadState, UploadStateMachine};

/// Schema version written with every record
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Bounds every owner context type satisfies
pub trait OwnerContext:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> OwnerContext for T where
    T: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Pre-authorized upload target returned by the sign stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTarget {
    /// Where the binary is sent
    pub upload_url: String,
    /// Form fields that must accompany a multipart upload
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Content type the storage expects, if it dictated one
    #[serde(default)]
    pub content_type: Option<String>,
    /// Where the file is readable once uploaded
    pub public_url: String,
    /// Backend-issued id echoed back on registration
    #[serde(default)]
    pub registration_id: Option<serde_json::Value>,
}

impl SignedTarget {
    pub fn new(upload_url: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            fields: BTreeMap::new(),
            content_type: None,
            public_url: public_url.into(),
            registration_id: None,
        }
    }
}

/// A locally captured file awaiting sign, upload and registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingArtifact<O> {
    pub schema_version: u32,
    /// Device-local path; primary key in the record store
    pub local_path: String,
    pub owner: O,
    pub captured_at: DateTime<Utc>,
    pub signed_target: Option<SignedTarget>,
    pub is_uploaded: bool,
    pub is_registered: bool,

    /// A stage executor is running for this record
    #[serde(skip)]
    pub is_busy: bool,
    /// Latest upload progress, 0-100
    #[serde(skip)]
    pub upload_progress_percent: u8,
}

impl<O> PendingArtifact<O> {
    /// Create a record with no stage completed
    pub fn new(local_path: impl Into<String>, owner: O) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            local_path: local_path.into(),
            owner,
            captured_at: Utc::now(),
            signed_target: None,
            is_uploaded: false,
            is_registered: false,
            is_busy: false,
            upload_progress_percent: 0,
        }
    }

    /// Stable state derived from the stage flags
    pub fn state(&self) -> UploadState {
        if self.is_registered {
            UploadState::Registered
        } else if self.is_uploaded {
            UploadState::Uploaded
        } else if self.signed_target.is_some() {
            UploadState::Signed
        } else {
            UploadState::New
        }
    }

    /// Check if the record needs no further dispatch
    pub fn is_terminal(&self) -> bool {
        self.is_registered
    }

    /// Last path segment, sent to the backend as the file name
    pub fn file_name(&self) -> &str {
        self.local_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.local_path)
    }

    /// Record the target returned by the sign stage
    pub fn mark_signed(&mut self, target: SignedTarget) -> Result<(), StateError> {
        self.apply_transition(UploadEvent::Signed)?;
        self.signed_target = Some(target);
        Ok(())
    }

    /// Record a successful binary transfer
    pub fn mark_uploaded(&mut self) -> Result<(), StateError> {
        self.apply_transition(UploadEvent::Uploaded)?;
        self.is_uploaded = true;
        self.upload_progress_percent = 100;
        Ok(())
    }

    /// Record a successful backend registration
    pub fn mark_registered(&mut self) -> Result<(), StateError> {
        self.apply_transition(UploadEvent::Registered)?;
        self.is_registered = true;
        Ok(())
    }

    fn apply_transition(&self, event: UploadEvent) -> Result<UploadState, StateError> {
        UploadStateMachine::transition(self.state(), event).map_err(|e| match e {
            StateError::InvalidTransition { from, event, .. } => StateError::GuardFailed(format!(
                "Cannot apply '{}' to {} in '{}' state",
                event, self.local_path, from
            )),
            StateError::TerminalState(state) => StateError::GuardFailed(format!(
                "{} is in terminal state '{}'",
                self.local_path, state
            )),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Owner {
        id: i64,
    }

    fn record() -> PendingArtifact<Owner> {
        PendingArtifact::new("/tmp/photos/a.jpg", Owner { id: 7 })
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert_eq!(r.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(r.state(), UploadState::New);
        assert!(r.signed_target.is_none());
        assert!(!r.is_uploaded && !r.is_registered && !r.is_busy);
        assert!(!r.is_terminal());
    }

    #[test]
    fn test_file_name_is_last_segment() {
        assert_eq!(record().file_name(), "a.jpg");
        assert_eq!(PendingArtifact::new("b.jpg", ()).file_name(), "b.jpg");
        assert_eq!(
            PendingArtifact::new("file:///data/c.jpg", ()).file_name(),
            "c.jpg"
        );
    }

    #[test]
    fn test_full_lifecycle() {
        let mut r = record();
        r.mark_signed(SignedTarget::new("https://s3/x", "https://cdn/x"))
            .unwrap();
        assert_eq!(r.state(), UploadState::Signed);
        r.mark_uploaded().unwrap();
        assert_eq!(r.state(), UploadState::Uploaded);
        assert_eq!(r.upload_progress_percent, 100);
        r.mark_registered().unwrap();
        assert_eq!(r.state(), UploadState::Registered);
        assert!(r.is_terminal());
    }

    #[test]
    fn test_upload_requires_target() {
        let mut r = record();
        let err = r.mark_uploaded().unwrap_err();
        assert!(matches!(err, StateError::GuardFailed(_)));
        assert!(!r.is_uploaded);
    }

    #[test]
    fn test_register_requires_upload() {
        let mut r = record();
        r.mark_signed(SignedTarget::new("https://s3/x", "https://cdn/x"))
            .unwrap();
        assert!(matches!(
            r.mark_registered(),
            Err(StateError::GuardFailed(_))
        ));
        assert!(!r.is_registered);
    }

    #[test]
    fn test_target_is_never_replaced() {
        let mut r = record();
        r.mark_signed(SignedTarget::new("https://s3/first", "https://cdn/first"))
            .unwrap();
        assert!(r
            .mark_signed(SignedTarget::new("https://s3/second", "https://cdn/second"))
            .is_err());
        assert_eq!(
            r.signed_target.as_ref().map(|t| t.upload_url.as_str()),
            Some("https://s3/first")
        );
    }

    #[test]
    fn test_registered_record_rejects_everything() {
        let mut r = record();
        r.mark_signed(SignedTarget::new("https://s3/x", "https://cdn/x"))
            .unwrap();
        r.mark_uploaded().unwrap();
        r.mark_registered().unwrap();

        let err = r.mark_registered().unwrap_err();
        assert!(err.to_string().contains("terminal"));
        assert!(r.is_registered && r.is_uploaded);
    }

    #[test]
    fn test_transient_fields_are_not_serialized() {
        let mut r = record();
        r.is_busy = true;
        r.upload_progress_percent = 42;

        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("is_busy").is_none());
        assert!(json.get("upload_progress_percent").is_none());
        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["owner"]["id"], 7);

        let back: PendingArtifact<Owner> = serde_json::from_value(json).unwrap();
        assert!(!back.is_busy);
        assert_eq!(back.upload_progress_percent, 0);
        assert_eq!(back.local_path, r.local_path);
    }
}
