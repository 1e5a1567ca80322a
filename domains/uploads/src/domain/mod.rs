//! Domain layer for uploads: record model, stage state machine, schema migration

pub mod entities;
pub mod migration;
pub mod state;
