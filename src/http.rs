//! HTTP helpers for datafile retrieval.

pub mod client;
pub mod retry;
