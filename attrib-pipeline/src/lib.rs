//! # Attribution Pipeline
//!
//! Converts raw session and conversion records into ordered customer
//! journeys, scores them in bounded batches against the remote attribution
//! service, persists the returned weights idempotently, and aggregates a
//! per-channel, per-date performance report.

pub mod journey;
pub mod pipeline;
pub mod report;
pub mod scoring;
