//! Upload pipeline: profiles, stage executors, the dispatch coordinator and
//! its progress channel

pub mod coordinator;
pub mod executors;
pub mod profiles;
pub mod progress;
