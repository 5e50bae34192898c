//! Datafile caching, remote retrieval, and load orchestration.

pub mod cache;
pub mod loader;
pub mod remote;
