//! State machine for pending upload stages
//!
//! Upload states: New → Signed → Uploaded → Registered
//! Registered is a terminal state. Signing, uploading and registering are
//! never persisted; they exist only while a stage executor is running.

use serde::{Deserialize, Serialize};

pub use docsync_common::StateError;

use crate::domain::entities::PendingArtifact;

/// Persisted, stable upload states derived from a record's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    New,
    Signed,
    Uploaded,
    Registered,
}

impl UploadState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered)
    }

    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [UploadState] {
        match self {
            Self::New => &[Self::Signed],
            Self::Signed => &[Self::Uploaded],
            Self::Uploaded => &[Self::Registered],
            Self::Registered => &[],
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Signed => write!(f, "signed"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::Registered => write!(f, "registered"),
        }
    }
}

/// Events that trigger upload state transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadEvent {
    /// Sign stage returned a target
    Signed,
    /// Binary transfer succeeded
    Uploaded,
    /// Backend record was created
    Registered,
}

impl std::fmt::Display for UploadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signed => write!(f, "signed"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::Registered => write!(f, "registered"),
        }
    }
}

/// Upload state machine
pub struct UploadStateMachine;

impl UploadStateMachine {
    /// Attempt a state transition
    pub fn transition(current: UploadState, event: UploadEvent) -> Result<UploadState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match (&current, &event) {
            (UploadState::New, UploadEvent::Signed) => UploadState::Signed,
            (UploadState::Signed, UploadEvent::Uploaded) => UploadState::Uploaded,
            (UploadState::Uploaded, UploadEvent::Registered) => UploadState::Registered,
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    to: "unknown".to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(current: UploadState, event: &UploadEvent) -> bool {
        Self::transition(current, *event).is_ok()
    }
}

/// One remote stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sign,
    Upload,
    Register,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sign => write!(f, "sign"),
            Self::Upload => write!(f, "upload"),
            Self::Register => write!(f, "register"),
        }
    }
}

/// What a dispatch should do next for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStage {
    /// A stage is already running; do not dispatch
    Busy,
    Sign,
    Upload,
    Register,
    /// Every stage succeeded
    Done,
}

impl NextStage {
    /// The remote stage to execute, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Sign => Some(Stage::Sign),
            Self::Upload => Some(Stage::Upload),
            Self::Register => Some(Stage::Register),
            Self::Busy | Self::Done => None,
        }
    }
}

/// Decide the next stage from a record's flags.
pub fn next_stage<O>(record: &PendingArtifact<O>) -> NextStage {
    if record.is_busy {
        NextStage::Busy
    } else if record.signed_target.is_none() {
        NextStage::Sign
    } else if !record.is_uploaded {
        NextStage::Upload
    } else if !record.is_registered {
        NextStage::Register
    } else {
        NextStage::Done
    }
}
