//! Repository implementations for the Uploads domain

pub mod records;

pub use records::PendingRecordStore;
