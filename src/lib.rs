//! Request orchestration for data-access calls.
//!
//! Every call to the backing data service goes through one
//! [`RequestOrchestrator`](orchestration::RequestOrchestrator), which adds
//! caching, in-flight deduplication, per-operation rate limiting, opt-in
//! retries and bounded batching, and always resolves to a value.

pub mod cache;
pub mod config;
pub mod core;
pub mod logging;
pub mod orchestration;
pub mod service;
