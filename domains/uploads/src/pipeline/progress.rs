//! Progress channel
//!
//! The coordinator reports every state change of a pending artifact through a
//! `ProgressSink`. Sinks are called inline from the pipeline and must not
//! block.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::domain::state::Stage;

/// What happened to a pending artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressStage {
    Queued,
    Signing,
    Uploading,
    Registering,
    Done,
    Failed { stage: Stage, reason: String },
    Removed,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Signing => write!(f, "signing"),
            Self::Uploading => write!(f, "uploading"),
            Self::Registering => write!(f, "registering"),
            Self::Done => write!(f, "done"),
            Self::Failed { stage, .. } => write!(f, "failed at {}", stage),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// One state change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub pipeline: &'static str,
    pub local_path: String,
    pub stage: ProgressStage,
    /// Only set while uploading
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn new(pipeline: &'static str, local_path: impl Into<String>, stage: ProgressStage) -> Self {
        Self {
            pipeline,
            local_path: local_path.into(),
            stage,
            percent: None,
        }
    }

    pub fn uploading(pipeline: &'static str, local_path: impl Into<String>, percent: u8) -> Self {
        Self {
            percent: Some(percent),
            ..Self::new(pipeline, local_path, ProgressStage::Uploading)
        }
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching
        let _ = self.send(event);
    }
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Sink that keeps every event for test assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingProgressSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far, in emission order
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .expect("events lock poisoned — prior test panicked")
            .clone()
    }

    /// Events for one artifact
    pub fn events_for(&self, local_path: &str) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.local_path == local_path)
            .collect()
    }

    /// Upload percentages reported for one artifact, in order
    pub fn percents_for(&self, local_path: &str) -> Vec<u8> {
        self.events_for(local_path)
            .into_iter()
            .filter(|e| e.stage == ProgressStage::Uploading)
            .filter_map(|e| e.percent)
            .collect()
    }

    /// Stages reported for one artifact, in order
    pub fn stages_for(&self, local_path: &str) -> Vec<ProgressStage> {
        self.events_for(local_path)
            .into_iter()
            .map(|e| e.stage)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .expect("events lock poisoned — prior test panicked")
            .clear();
    }
}

impl ProgressSink for RecordingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
