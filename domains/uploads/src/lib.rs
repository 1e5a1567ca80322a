//! Uploads domain: pending artifacts, their durable store and the pipeline
//! that drives them through sign, upload and register

pub mod domain;
pub mod pipeline;
pub mod repository;

// Re-export domain types at the crate root for convenience
pub use domain::entities::{OwnerContext, PendingArtifact, SignedTarget, CURRENT_SCHEMA_VERSION};
pub use domain::migration::{decode_record, DecodedRecord, LegacyDecoder};
pub use domain::state::{
    next_stage, NextStage, Stage, StateError, UploadEvent, UploadState, UploadStateMachine,
};

// Re-export repository types
pub use repository::PendingRecordStore;

// Re-export pipeline types
pub use pipeline::coordinator::{
    AddedUpload, ArtifactStatus, DispatchOutcome, PipelineOptions, PipelineServices,
    StageFailure, UploadCoordinator,
};
pub use pipeline::executors::{StageError, StageExecutor};
pub use pipeline::profiles::{
    InvoiceOwner, InvoiceProfile, ProfileDecoder, ReceiptOwner, ReceiptProfile, UploadProfile,
};
pub use pipeline::progress::{
    NoopProgressSink, ProgressEvent, ProgressSink, ProgressStage, RecordingProgressSink,
};
